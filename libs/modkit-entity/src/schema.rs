//! Message schemas and their derivation from record types.
//!
//! A [`MessageSchema`] is an ordered list of field descriptors. Schemas for a
//! record type are derived from a [`Selection`] of field names and cached per
//! `(purpose, selection)` on the record type, so every caller asking for the
//! same shape shares one `Arc`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::SchemaError;
use crate::model::{FieldRef, Property, RecordType};
use crate::value::{EnumType, Value};

/// Field name of the item list in a collection message.
pub const ITEMS: &str = "items";
/// Field name of the continuation token in a collection message.
pub const NEXT_PAGE_TOKEN: &str = "nextPageToken";

/// Wire type of a single message field element.
#[derive(Clone, Debug, PartialEq)]
pub enum WireType {
    String,
    Integer,
    Float,
    Boolean,
    Bytes,
    DateTime,
    Enum(Arc<EnumType>),
    Message(Arc<MessageSchema>),
}

impl WireType {
    /// Whether a single (non-list) value has this wire type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (WireType::String, Value::String(_))
            | (WireType::Integer, Value::Integer(_))
            | (WireType::Float, Value::Float(_))
            | (WireType::Boolean, Value::Bool(_))
            | (WireType::Bytes, Value::Bytes(_))
            | (WireType::DateTime, Value::DateTime(_)) => true,
            (WireType::Enum(ty), Value::Enum(v)) => ty.contains(v),
            (WireType::Message(schema), Value::Message(m)) => {
                Arc::ptr_eq(schema, m.schema()) || schema.as_ref() == m.schema().as_ref()
            }
            _ => false,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireType::String => write!(f, "string"),
            WireType::Integer => write!(f, "integer"),
            WireType::Float => write!(f, "float"),
            WireType::Boolean => write!(f, "bool"),
            WireType::Bytes => write!(f, "bytes"),
            WireType::DateTime => write!(f, "datetime"),
            WireType::Enum(ty) => write!(f, "enum {}", ty.name()),
            WireType::Message(schema) => write!(f, "message {}", schema.name()),
        }
    }
}

/// One field of a message schema.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    number: u32,
    wire: WireType,
    repeated: bool,
    required: bool,
    default: Option<Value>,
}

impl FieldDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, wire: WireType) -> Self {
        Self {
            name: name.into(),
            number: 0,
            wire,
            repeated: false,
            required: false,
            default: None,
        }
    }

    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based position, assigned by [`MessageSchema::new`].
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    #[must_use]
    pub fn wire_type(&self) -> &WireType {
        &self.wire
    }

    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if self.repeated {
            return value
                .as_list()
                .is_some_and(|items| items.iter().all(|v| self.wire.accepts(v)));
        }
        self.wire.accepts(value)
    }

    #[must_use]
    pub fn type_label(&self) -> String {
        if self.repeated {
            format!("repeated {}", self.wire)
        } else {
            self.wire.to_string()
        }
    }
}

/// Immutable, ordered field list of a message type.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageSchema {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl MessageSchema {
    /// Numbers the fields 1.. in the given order.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Arc<Self> {
        Arc::new(Self::numbered(name.into(), fields))
    }

    fn numbered(name: String, mut fields: Vec<FieldDescriptor>) -> Self {
        for (number, field) in (1..).zip(fields.iter_mut()) {
            field.number = number;
        }
        Self { name, fields }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(FieldDescriptor::name)
    }
}

static GEO_PT_SCHEMA: LazyLock<Arc<MessageSchema>> = LazyLock::new(|| {
    MessageSchema::new(
        "GeoPtMessage",
        vec![
            FieldDescriptor::new("lat", WireType::Float).required(),
            FieldDescriptor::new("lon", WireType::Float).required(),
        ],
    )
});

static USER_SCHEMA: LazyLock<Arc<MessageSchema>> = LazyLock::new(|| {
    MessageSchema::new(
        "UserMessage",
        vec![
            FieldDescriptor::new("email", WireType::String).required(),
            FieldDescriptor::new("auth_domain", WireType::String).required(),
            FieldDescriptor::new("user_id", WireType::String),
            FieldDescriptor::new("federated_identity", WireType::String),
        ],
    )
});

/// `{lat, lon}` message carrying a geographic point.
#[must_use]
pub fn geo_pt_schema() -> Arc<MessageSchema> {
    Arc::clone(&GEO_PT_SCHEMA)
}

/// `{email, auth_domain, user_id, federated_identity}` message carrying a user identity.
#[must_use]
pub fn user_schema() -> Arc<MessageSchema> {
    Arc::clone(&USER_SCHEMA)
}

/// Ordered list of field names drawn from a record type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Selection(Vec<String>);

impl Selection {
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Every name must exist on `record_type`, and only once.
    ///
    /// # Errors
    /// `SchemaError::UnknownField` or `SchemaError::DuplicateField`.
    pub fn validate(&self, record_type: &RecordType) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for name in self.iter() {
            if record_type.field(name).is_none() {
                return Err(SchemaError::UnknownField {
                    record: record_type.kind().to_owned(),
                    field: name.to_owned(),
                });
            }
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateField(name.to_owned()));
            }
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// What a derived schema is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaPurpose {
    /// Request or response body carrying one record.
    Record,
    /// Query parameters of a list method.
    Query,
    /// Page of records plus continuation token.
    Collection,
}

/// Build-once cache of derived schemas, keyed by purpose and selection.
#[derive(Default)]
pub(crate) struct SchemaCache {
    built: RwLock<HashMap<(SchemaPurpose, Selection), Arc<MessageSchema>>>,
}

impl SchemaCache {
    /// Concurrent misses may both build; the first insert wins and every
    /// caller gets that `Arc`.
    pub(crate) fn get_or_build<F>(
        &self,
        purpose: SchemaPurpose,
        selection: &Selection,
        build: F,
    ) -> Result<Arc<MessageSchema>, SchemaError>
    where
        F: FnOnce() -> Result<MessageSchema, SchemaError>,
    {
        let key = (purpose, selection.clone());
        if let Some(hit) = self.built.read().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let schema = build()?;
        debug!(
            schema = %schema.name(),
            ?purpose,
            fields = schema.fields().len(),
            "derived message schema"
        );
        let mut built = self.built.write();
        Ok(Arc::clone(built.entry(key).or_insert_with(|| Arc::new(schema))))
    }
}

fn schema_name(record_type: &RecordType, suffix: &str, selection: &Selection) -> String {
    let mut name = format!("{}{suffix}", record_type.kind());
    if *selection != record_type.default_selection() {
        for field in selection.iter() {
            name.push('_');
            name.push_str(field);
        }
    }
    name
}

fn property_descriptor(property: &Property) -> Result<FieldDescriptor, SchemaError> {
    let mut field = FieldDescriptor::new(property.name(), property.wire_type());
    if property.is_repeated() {
        field = field.repeated();
    }
    if property.is_required() && !property.is_automatic() {
        field = field.required();
    }
    if let Some(default) = property.default_value() {
        let encoded = property
            .encode(default)
            .map_err(|_| SchemaError::InvalidDefault {
                field: property.name().to_owned(),
                expected: field.type_label(),
            })?;
        field = field.with_default(encoded);
    }
    Ok(field)
}

/// Derive the schema of `purpose` for a validated or unvalidated selection.
pub(crate) fn derive(
    record_type: &RecordType,
    purpose: SchemaPurpose,
    selection: &Selection,
) -> Result<MessageSchema, SchemaError> {
    selection.validate(record_type)?;
    match purpose {
        SchemaPurpose::Record => {
            let fields = selection
                .iter()
                .map(|name| record_field(record_type, name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MessageSchema::numbered(
                schema_name(record_type, "Proto", selection),
                fields,
            ))
        }
        SchemaPurpose::Query => {
            let fields = selection
                .iter()
                .map(|name| query_field(record_type, name))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MessageSchema::numbered(
                schema_name(record_type, "Query", selection),
                fields,
            ))
        }
        SchemaPurpose::Collection => {
            let item = record_type.schema(Some(selection))?;
            Ok(MessageSchema::numbered(
                schema_name(record_type, "Collection", selection),
                vec![
                    FieldDescriptor::new(ITEMS, WireType::Message(item)).repeated(),
                    FieldDescriptor::new(NEXT_PAGE_TOKEN, WireType::String),
                ],
            ))
        }
    }
}

fn record_field(record_type: &RecordType, name: &str) -> Result<FieldDescriptor, SchemaError> {
    match record_type.field(name) {
        Some(FieldRef::Property(p)) => property_descriptor(p),
        Some(FieldRef::Alias(a)) => {
            let mut field = FieldDescriptor::new(a.name(), a.resolved_wire_type()?);
            if a.is_repeated() {
                field = field.repeated();
            }
            if a.is_required() {
                field = field.required();
            }
            if let Some(default) = a.default_value() {
                field = field.with_default(default.clone());
            }
            Ok(field)
        }
        None => Err(SchemaError::UnknownField {
            record: record_type.kind().to_owned(),
            field: name.to_owned(),
        }),
    }
}

fn query_field(record_type: &RecordType, name: &str) -> Result<FieldDescriptor, SchemaError> {
    match record_type.field(name) {
        Some(FieldRef::Property(p)) => {
            if !p.kind().is_filterable() {
                return Err(SchemaError::UnsupportedFilterType {
                    field: p.name().to_owned(),
                    kind: p.kind().to_string(),
                });
            }
            Ok(FieldDescriptor::new(p.name(), p.wire_type()))
        }
        Some(FieldRef::Alias(a)) if !a.has_setter() => {
            Err(SchemaError::ReadOnlyField(a.name().to_owned()))
        }
        _ => record_field(record_type, name),
    }
}

/// Every alias field of `schema` must have a setter.
pub(crate) fn check_settable(
    record_type: &RecordType,
    schema: &MessageSchema,
) -> Result<(), SchemaError> {
    for name in schema.field_names() {
        if let Some(FieldRef::Alias(a)) = record_type.field(name)
            && !a.has_setter()
        {
            return Err(SchemaError::ReadOnlyField(a.name().to_owned()));
        }
    }
    Ok(())
}
