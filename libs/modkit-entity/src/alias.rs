//! Alias properties: computed fields with a getter and an optional setter.
//!
//! Every record type starts with five exempt aliases (`id`, `entityKey`,
//! `limit`, `order`, `pageToken`). They never show up in the default field
//! list but can be selected by any method. Declaring an alias with one of
//! these names replaces the default entirely; the default getters and
//! setters stay available as plain functions so a replacement can delegate
//! to them.

use std::fmt;
use std::sync::Arc;

use crate::config::QueryLimits;
use crate::error::{ApiError, ConversionError, SchemaError};
use crate::key::Key;
use crate::model::Record;
use crate::query::{Cursor, OrderBy};
use crate::schema::WireType;
use crate::store::Datastore;
use crate::value::{UserIdentity, Value};

pub const ID: &str = "id";
pub const ENTITY_KEY: &str = "entityKey";
pub const LIMIT: &str = "limit";
pub const ORDER: &str = "order";
pub const PAGE_TOKEN: &str = "pageToken";

pub type AliasGetter = Arc<dyn Fn(&Record) -> Option<Value> + Send + Sync>;
pub type AliasSetter =
    Arc<dyn Fn(&mut Record, Value, &SetContext<'_>) -> Result<(), ApiError> + Send + Sync>;

/// What an alias setter may consult besides the record itself.
#[derive(Clone, Copy)]
pub struct SetContext<'a> {
    pub store: &'a dyn Datastore,
    pub user: Option<&'a UserIdentity>,
    pub limits: &'a QueryLimits,
}

impl<'a> SetContext<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Datastore, limits: &'a QueryLimits) -> Self {
        Self {
            store,
            user: None,
            limits,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: Option<&'a UserIdentity>) -> Self {
        self.user = user;
        self
    }
}

/// A computed field of a record type.
#[derive(Clone)]
pub struct AliasProperty {
    name: String,
    getter: AliasGetter,
    setter: Option<AliasSetter>,
    wire_type: Option<WireType>,
    required: bool,
    default: Option<Value>,
    exempt: bool,
    repeated: bool,
}

impl fmt::Debug for AliasProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasProperty")
            .field("name", &self.name)
            .field("settable", &self.setter.is_some())
            .field("wire_type", &self.wire_type)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("exempt", &self.exempt)
            .field("repeated", &self.repeated)
            .finish_non_exhaustive()
    }
}

impl AliasProperty {
    #[must_use]
    pub fn new<G>(name: impl Into<String>, getter: G) -> Self
    where
        G: Fn(&Record) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            getter: Arc::new(getter),
            setter: None,
            wire_type: None,
            required: false,
            default: None,
            exempt: false,
            repeated: false,
        }
    }

    #[must_use]
    pub fn with_setter<S>(mut self, setter: S) -> Self
    where
        S: Fn(&mut Record, Value, &SetContext<'_>) -> Result<(), ApiError> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    #[must_use]
    pub fn with_wire_type(mut self, wire: WireType) -> Self {
        self.wire_type = Some(wire);
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Keep the alias out of the default field list.
    #[must_use]
    pub fn exempt(mut self) -> Self {
        self.exempt = true;
        self
    }

    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn is_exempt(&self) -> bool {
        self.exempt
    }

    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    #[must_use]
    pub fn has_setter(&self) -> bool {
        self.setter.is_some()
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn wire_type(&self) -> Option<&WireType> {
        self.wire_type.as_ref()
    }

    /// Explicit wire type, else inferred from a scalar default, else `String`.
    ///
    /// # Errors
    /// `SchemaError::MissingPropertyType` when only a default is given and
    /// its wire type cannot be inferred.
    pub fn resolved_wire_type(&self) -> Result<WireType, SchemaError> {
        if let Some(w) = &self.wire_type {
            return Ok(w.clone());
        }
        let sample = match &self.default {
            None => return Ok(WireType::String),
            Some(Value::List(items)) if self.repeated => match items.first() {
                Some(first) => first,
                None => return Ok(WireType::String),
            },
            Some(v) => v,
        };
        match sample {
            Value::String(_) => Ok(WireType::String),
            Value::Integer(_) => Ok(WireType::Integer),
            Value::Float(_) => Ok(WireType::Float),
            Value::Bool(_) => Ok(WireType::Boolean),
            Value::Bytes(_) => Ok(WireType::Bytes),
            Value::DateTime(_) => Ok(WireType::DateTime),
            _ => Err(SchemaError::MissingPropertyType(self.name.clone())),
        }
    }

    #[must_use]
    pub fn get(&self, record: &Record) -> Option<Value> {
        (self.getter)(record)
    }

    pub(crate) fn set(
        &self,
        record: &mut Record,
        value: Value,
        ctx: &SetContext<'_>,
    ) -> Result<(), ApiError> {
        let Some(setter) = &self.setter else {
            return Err(SchemaError::ReadOnlyField(self.name.clone()).into());
        };
        setter(record, value, ctx)
    }
}

/// The five default aliases, in this order.
#[must_use]
pub fn defaults() -> Vec<AliasProperty> {
    vec![
        AliasProperty::new(ID, id_get)
            .with_setter(id_set)
            .with_wire_type(WireType::Integer)
            .exempt(),
        AliasProperty::new(ENTITY_KEY, entity_key_get)
            .with_setter(entity_key_set)
            .with_wire_type(WireType::String)
            .exempt(),
        AliasProperty::new(LIMIT, limit_get)
            .with_setter(limit_set)
            .with_wire_type(WireType::Integer)
            .exempt(),
        AliasProperty::new(ORDER, order_get)
            .with_setter(order_set)
            .with_wire_type(WireType::String)
            .exempt(),
        AliasProperty::new(PAGE_TOKEN, page_token_get)
            .with_setter(page_token_set)
            .with_wire_type(WireType::String)
            .exempt(),
    ]
}

fn expect_integer(field: &str, value: &Value) -> Result<i64, ApiError> {
    value
        .as_i64()
        .ok_or_else(|| ConversionError::mismatch(field, "integer", value).into())
}

fn expect_string<'v>(field: &str, value: &'v Value) -> Result<&'v str, ApiError> {
    value
        .as_str()
        .ok_or_else(|| ConversionError::mismatch(field, "string", value).into())
}

/// Integer id of the record key.
#[must_use]
pub fn id_get(record: &Record) -> Option<Value> {
    record.key().and_then(Key::integer_id).map(Value::Integer)
}

/// Key the record by an integer id and merge in the persisted record, if any.
///
/// # Errors
/// `BadRequest` for a non-positive id; store failures are propagated.
#[allow(clippy::needless_pass_by_value)]
pub fn id_set(record: &mut Record, value: Value, ctx: &SetContext<'_>) -> Result<(), ApiError> {
    let id = expect_integer(ID, &value)?;
    if id <= 0 {
        return Err(ApiError::bad_request(format!("invalid id: {id}")));
    }
    let key = Key::new(record.kind(), id);
    record.update_from_key(key, ctx.store)
}

/// Url-safe token of a complete record key.
#[must_use]
pub fn entity_key_get(record: &Record) -> Option<Value> {
    record
        .key()
        .filter(|k| k.is_complete())
        .map(|k| Value::String(k.urlsafe()))
}

/// Parse a key token, require it to name this record's kind, then merge in
/// the persisted record.
///
/// # Errors
/// `BadRequest` for a malformed token or a key of another kind.
#[allow(clippy::needless_pass_by_value)]
pub fn entity_key_set(
    record: &mut Record,
    value: Value,
    ctx: &SetContext<'_>,
) -> Result<(), ApiError> {
    let token = expect_string(ENTITY_KEY, &value)?;
    let key = Key::from_urlsafe(token)
        .map_err(|e| ApiError::bad_request(format!("invalid entityKey: {e}")))?;
    record.update_from_key(key, ctx.store)
}

#[must_use]
pub fn limit_get(record: &Record) -> Option<Value> {
    record.query_info().limit.map(Value::from)
}

/// Record the requested page size.
///
/// # Errors
/// `BadRequest` unless `0 < limit <= max_limit`.
#[allow(clippy::needless_pass_by_value)]
pub fn limit_set(record: &mut Record, value: Value, ctx: &SetContext<'_>) -> Result<(), ApiError> {
    let requested = expect_integer(LIMIT, &value)?;
    let limit = ctx
        .limits
        .check_limit(requested)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    record.query_info_mut().limit = Some(limit);
    Ok(())
}

#[must_use]
pub fn order_get(record: &Record) -> Option<Value> {
    record.query_info().order_raw.clone().map(Value::String)
}

/// Parse `"attr1,-attr2"` into the query order. Every name must be a
/// storage property of the record type.
///
/// # Errors
/// `BadRequest` for an empty order or an unknown property.
#[allow(clippy::needless_pass_by_value)]
pub fn order_set(record: &mut Record, value: Value, _ctx: &SetContext<'_>) -> Result<(), ApiError> {
    let raw = expect_string(ORDER, &value)?;
    let order = OrderBy::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))?;
    if let Some(unknown) = order
        .keys()
        .iter()
        .find(|k| record.record_type().property(&k.field).is_none())
    {
        return Err(ApiError::bad_request(format!(
            "{} is not a property of {}",
            unknown.field,
            record.kind()
        )));
    }
    let info = record.query_info_mut();
    info.order_raw = Some(raw.to_owned());
    info.order = Some(order);
    Ok(())
}

#[must_use]
pub fn page_token_get(record: &Record) -> Option<Value> {
    record.query_info().page_token.clone().map(Value::String)
}

/// Parse the opaque page token into a start cursor.
///
/// # Errors
/// `BadRequest` when the token is not a valid cursor.
#[allow(clippy::needless_pass_by_value)]
pub fn page_token_set(
    record: &mut Record,
    value: Value,
    _ctx: &SetContext<'_>,
) -> Result<(), ApiError> {
    let token = expect_string(PAGE_TOKEN, &value)?;
    let cursor = Cursor::from_websafe(token).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let info = record.query_info_mut();
    info.page_token = Some(token.to_owned());
    info.cursor = Some(cursor);
    Ok(())
}
