//! Tagged field values shared by records and messages.
//!
//! A record stores its properties as [`Value`]s and a message carries its
//! fields as [`Value`]s; transforms in [`crate::convert`] translate between
//! the storage shape and the wire shape of the same datum.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::message::Message;

/// Auth domain assigned to identities created without an explicit one.
pub const DEFAULT_AUTH_DOMAIN: &str = "gmail.com";

/// Geographic point, stored as a single property and sent as a `{lat, lon}` message.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPt {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPt {
    /// Returns `None` when the coordinates are out of range.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            Some(Self { lat, lon })
        } else {
            None
        }
    }
}

/// Identity of an authenticated caller.
///
/// This is the "opaque multi-valued identity object": it has no scalar wire
/// form and therefore can never be an equality-filterable query parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub email: String,
    pub auth_domain: String,
    pub user_id: Option<String>,
    pub federated_identity: Option<String>,
}

impl UserIdentity {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            auth_domain: DEFAULT_AUTH_DOMAIN.to_owned(),
            user_id: None,
            federated_identity: None,
        }
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_auth_domain(mut self, auth_domain: impl Into<String>) -> Self {
        self.auth_domain = auth_domain.into();
        self
    }
}

/// A closed set of named integer constants, usable as a property kind or
/// as the wire type of an alias property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnumType {
    name: String,
    variants: Vec<(String, i32)>,
}

impl EnumType {
    pub fn new<'a>(name: impl Into<String>, variants: impl IntoIterator<Item = (&'a str, i32)>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            variants: variants
                .into_iter()
                .map(|(n, v)| (n.to_owned(), v))
                .collect(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<EnumValue> {
        self.variants
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, v)| self.make(n, *v))
    }

    #[must_use]
    pub fn by_number(&self, number: i32) -> Option<EnumValue> {
        self.variants
            .iter()
            .find(|(_, v)| *v == number)
            .map(|(n, v)| self.make(n, *v))
    }

    pub fn variants(&self) -> impl Iterator<Item = EnumValue> + '_ {
        self.variants.iter().map(|(n, v)| self.make(n, *v))
    }

    /// True when `value` is one of this type's variants.
    #[must_use]
    pub fn contains(&self, value: &EnumValue) -> bool {
        value.type_name == self.name
            && self
                .variants
                .iter()
                .any(|(n, v)| *n == value.name && *v == value.number)
    }

    fn make(&self, name: &str, number: i32) -> EnumValue {
        EnumValue {
            type_name: self.name.clone(),
            name: name.to_owned(),
            number,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub type_name: String,
    pub name: String,
    pub number: i32,
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

/// A single field value, on either side of the record/message boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    GeoPt(GeoPt),
    User(UserIdentity),
    Key(Key),
    Enum(EnumValue),
    Message(Message),
    List(Vec<Value>),
}

impl Value {
    /// Short type label used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::GeoPt(_) => "geopt",
            Value::User(_) => "user",
            Value::Key(_) => "key",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Scalar values can appear as a bare wire field and as an equality filter.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        !matches!(
            self,
            Value::GeoPt(_) | Value::User(_) | Value::Message(_) | Value::List(_)
        )
    }

    /// Total order used when sorting query results.
    ///
    /// Values of the same variant compare naturally; different variants
    /// compare by a fixed type rank so mixed columns still sort deterministically.
    #[must_use]
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => {
                #[allow(clippy::cast_precision_loss)]
                let a = *a as f64;
                a.total_cmp(b)
            }
            (Value::Float(a), Value::Integer(b)) => {
                #[allow(clippy::cast_precision_loss)]
                let b = *b as f64;
                a.total_cmp(&b)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::GeoPt(a), Value::GeoPt(b)) => {
                a.lat.total_cmp(&b.lat).then(a.lon.total_cmp(&b.lon))
            }
            (Value::User(a), Value::User(b)) => a.email.cmp(&b.email),
            (Value::Key(a), Value::Key(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.number.cmp(&b.number),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Integer(_) | Value::Float(_) => 0,
            Value::Bool(_) => 1,
            Value::String(_) => 2,
            Value::Bytes(_) => 3,
            Value::Date(_) | Value::Time(_) | Value::DateTime(_) => 4,
            Value::GeoPt(_) => 5,
            Value::User(_) => 6,
            Value::Key(_) => 7,
            Value::Enum(_) => 8,
            Value::Message(_) => 9,
            Value::List(_) => 10,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<GeoPt> for Value {
    fn from(v: GeoPt) -> Self {
        Value::GeoPt(v)
    }
}

impl From<UserIdentity> for Value {
    fn from(v: UserIdentity) -> Self {
        Value::User(v)
    }
}

impl From<Key> for Value {
    fn from(v: Key) -> Self {
        Value::Key(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Message(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}
