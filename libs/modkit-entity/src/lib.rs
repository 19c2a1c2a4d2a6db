//! Datastore record types that double as RPC message schemas.
//!
//! A [`RecordType`] declares storage properties and alias properties once.
//! From it the crate derives request, response, query and collection
//! [`MessageSchema`]s (cached per field selection), converts between
//! [`Record`]s and [`Message`]s, and wires single-record and list endpoints
//! into an [`Api`]. Persistence sits behind the [`Datastore`] trait; the
//! crate ships an in-memory implementation.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod alias;
pub mod codec;
pub mod config;
pub mod convert;
pub mod endpoint;
pub mod error;
pub mod key;
pub mod message;
pub mod model;
pub mod problem;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

pub use alias::{AliasProperty, SetContext};
pub use codec::{JsonCodec, MessageCodec};
pub use config::{EntityConfig, QueryLimits};
pub use convert::{from_message, to_message};
pub use endpoint::{Api, Endpoint, MessageMethod, QueryMethod, RecordMethod, RequestContext};
pub use error::{ApiError, ConversionError, QueryError, SchemaError};
pub use key::{Key, KeyId};
pub use message::Message;
pub use model::{Property, PropertyKind, Record, RecordType, Transform};
pub use problem::{APPLICATION_PROBLEM_JSON, ErrDef, Problem, ValidationViolation};
pub use query::{Cursor, OrderBy, Query, QueryDescriptor, SortDir};
pub use schema::{FieldDescriptor, MessageSchema, Selection, WireType};
pub use store::{Datastore, MemoryDatastore, QueryPage, StoreError};
pub use value::{EnumType, EnumValue, GeoPt, UserIdentity, Value};

