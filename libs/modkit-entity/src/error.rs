//! Error taxonomy.
//!
//! - [`SchemaError`]: programmer errors raised while declaring record types
//!   or deriving schemas. Surfaced immediately, never retried.
//! - [`ConversionError`]: per-request decode failures, reported to the
//!   client as a bad request.
//! - [`QueryError`]: malformed query parameters (order, cursor, limit).
//! - [`ApiError`]: the RPC exception vocabulary that handlers and alias
//!   setters raise; mapped to HTTP status codes in [`crate::problem`].

use http::StatusCode;
use thiserror::Error;

use crate::store::StoreError;
use crate::value::Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown field '{field}' on record type {record}")]
    UnknownField { record: String, field: String },

    #[error("field '{0}' is selected more than once")]
    DuplicateField(String),

    #[error("property '{0}' is declared more than once")]
    DuplicateProperty(String),

    #[error("alias property '{0}' needs an explicit wire type")]
    MissingPropertyType(String),

    #[error("field '{field}' of kind {kind} cannot be used as a query filter")]
    UnsupportedFilterType { field: String, kind: String },

    #[error("alias property '{0}' has no setter and cannot appear in a request")]
    ReadOnlyField(String),

    #[error("default value of '{field}' does not match type {expected}")]
    InvalidDefault { field: String, expected: String },

    #[error("method '{0}' is registered more than once")]
    DuplicateMethod(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("required field '{0}' is missing")]
    RequiredFieldMissing(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

impl ConversionError {
    pub fn mismatch(field: &str, expected: impl Into<String>, got: &Value) -> Self {
        ConversionError::TypeMismatch {
            field: field.to_owned(),
            expected: expected.into(),
            got: got.type_name().to_owned(),
        }
    }

    /// Name of the offending field, when the error is tied to one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            ConversionError::TypeMismatch { field, .. }
            | ConversionError::RequiredFieldMissing(field)
            | ConversionError::UnknownField(field) => Some(field),
            ConversionError::Malformed(_) => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("invalid page token")]
    InvalidCursor,

    #[error("limit must be a positive integer no greater than {max}")]
    InvalidLimit { max: u32 },
}

/// Failures that propagate unchanged to the transport boundary.
#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    /// HTTP status the transport answers with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::Conversion(_)
            | ApiError::Query(_)
            | ApiError::Store(StoreError::InvalidCursor) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Schema(_) | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors are the caller's fault; everything else is ours.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}
