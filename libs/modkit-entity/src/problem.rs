//! RFC 9457 Problem Details for failed endpoint calls.
//!
//! [`ApiError`] converts into a [`Problem`] through the static [`catalog`];
//! the transport writes it with [`APPLICATION_PROBLEM_JSON`].

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ConversionError};
use crate::store::StoreError;

pub const APPLICATION_PROBLEM_JSON: &str = "application/problem+json";

/// `StatusCode` as its bare numeric value.
mod status_as_u16 {
    use http::StatusCode;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(status: &StatusCode, out: S) -> Result<S::Ok, S::Error> {
        out.serialize_u16(status.as_u16())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(input: D) -> Result<StatusCode, D::Error> {
        let raw = u16::deserialize(input)?;
        StatusCode::from_u16(raw).map_err(serde::de::Error::custom)
    }
}

/// Failure of one method call, shaped after RFC 9457.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_url: String,
    pub title: String,
    #[serde(with = "status_as_u16")]
    pub status: StatusCode,
    pub detail: String,
    /// Method name the problem occurred in.
    pub instance: String,
    /// Machine-readable code from the catalog.
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationViolation>,
}

/// A failure pinned to one message field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub field: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Problem {
    /// A problem outside the catalog; `type` defaults to `about:blank`.
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            type_url: "about:blank".to_owned(),
            title: title.into(),
            status,
            detail: detail.into(),
            instance: String::new(),
            code: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_violation(mut self, violation: ValidationViolation) -> Self {
        self.errors.push(violation);
        self
    }
}

/// Static error definition from the catalog.
#[derive(Debug, Clone, Copy)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub code: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    #[inline]
    pub fn as_problem(&self, detail: impl Into<String>) -> Problem {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Problem {
            type_url: self.type_url.to_owned(),
            code: self.code.to_owned(),
            ..Problem::new(status, self.title, detail)
        }
    }
}

pub mod catalog {
    use super::ErrDef;

    pub const BAD_REQUEST: ErrDef = ErrDef {
        status: 400,
        title: "Bad Request",
        code: "gts.hx.entity.errors.bad_request.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.bad_request.v1",
    };

    pub const INVALID_MESSAGE: ErrDef = ErrDef {
        status: 400,
        title: "Invalid Message",
        code: "gts.hx.entity.errors.invalid_message.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.invalid_message.v1",
    };

    pub const INVALID_QUERY: ErrDef = ErrDef {
        status: 400,
        title: "Invalid Query",
        code: "gts.hx.entity.errors.invalid_query.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.invalid_query.v1",
    };

    pub const UNAUTHORIZED: ErrDef = ErrDef {
        status: 401,
        title: "Unauthorized",
        code: "gts.hx.entity.errors.unauthorized.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.unauthorized.v1",
    };

    pub const FORBIDDEN: ErrDef = ErrDef {
        status: 403,
        title: "Forbidden",
        code: "gts.hx.entity.errors.forbidden.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.forbidden.v1",
    };

    pub const NOT_FOUND: ErrDef = ErrDef {
        status: 404,
        title: "Not Found",
        code: "gts.hx.entity.errors.not_found.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.not_found.v1",
    };

    pub const METHOD_NOT_FOUND: ErrDef = ErrDef {
        status: 404,
        title: "Method Not Found",
        code: "gts.hx.entity.errors.method_not_found.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.method_not_found.v1",
    };

    pub const INTERNAL: ErrDef = ErrDef {
        status: 500,
        title: "Internal Server Error",
        code: "gts.hx.entity.errors.internal.v1",
        type_url: "https://errors.hyperspot.dev/gts.hx.entity.errors.internal.v1",
    };
}

fn violation(err: &ConversionError) -> Option<ValidationViolation> {
    let code = match err {
        ConversionError::TypeMismatch { .. } => "type_mismatch",
        ConversionError::RequiredFieldMissing(_) => "required",
        ConversionError::UnknownField(_) => "unknown_field",
        ConversionError::Malformed(_) => return None,
    };
    err.field().map(|field| ValidationViolation {
        field: field.to_owned(),
        message: err.to_string(),
        code: Some(code.to_owned()),
    })
}

impl From<ApiError> for Problem {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::BadRequest(msg) => catalog::BAD_REQUEST.as_problem(msg),
            ApiError::NotFound(msg) => catalog::NOT_FOUND.as_problem(msg),
            ApiError::Forbidden(msg) => catalog::FORBIDDEN.as_problem(msg),
            ApiError::Unauthorized(msg) => catalog::UNAUTHORIZED.as_problem(msg),
            ApiError::Conversion(e) => {
                let problem = catalog::INVALID_MESSAGE.as_problem(e.to_string());
                match violation(&e) {
                    Some(v) => problem.with_violation(v),
                    None => problem,
                }
            }
            ApiError::Query(e) => catalog::INVALID_QUERY.as_problem(e.to_string()),
            ApiError::Store(StoreError::InvalidCursor) => {
                catalog::INVALID_QUERY.as_problem(StoreError::InvalidCursor.to_string())
            }
            ApiError::Schema(_) | ApiError::Store(_) => {
                catalog::INTERNAL.as_problem("An internal error occurred while handling the request")
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::{QueryError, SchemaError};

    #[test]
    fn status_travels_as_a_number() {
        let p = catalog::NOT_FOUND.as_problem("missing").with_instance("MyModel.get");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], 404);
        assert_eq!(json["type"], catalog::NOT_FOUND.type_url);
        assert_eq!(json["instance"], "MyModel.get");
        assert!(json.get("errors").is_none());
        let back: Problem = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn api_errors_map_to_catalog_entries() {
        let p: Problem = ApiError::unauthorized("Invalid token.").into();
        assert_eq!(p.status, StatusCode::UNAUTHORIZED);
        assert_eq!(p.detail, "Invalid token.");
        assert!(p.code.contains("unauthorized"));

        let p: Problem = ApiError::from(QueryError::InvalidCursor).into();
        assert_eq!(p.status, StatusCode::BAD_REQUEST);

        let p: Problem = ApiError::from(StoreError::InvalidCursor).into();
        assert_eq!(p.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conversion_errors_carry_a_field_violation() {
        let p: Problem = ApiError::from(ConversionError::RequiredFieldMissing("attr1".to_owned())).into();
        assert_eq!(p.status, StatusCode::BAD_REQUEST);
        assert_eq!(p.errors.len(), 1);
        assert_eq!(p.errors[0].field, "attr1");
        assert_eq!(p.errors[0].code.as_deref(), Some("required"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let p: Problem = ApiError::from(SchemaError::DuplicateField("x".to_owned())).into();
        assert_eq!(p.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!p.detail.contains('x'));
        let p: Problem = ApiError::from(StoreError::Backend("disk".to_owned())).into();
        assert_eq!(p.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
