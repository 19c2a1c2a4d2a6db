//! Record types and record instances.
//!
//! A [`RecordType`] is the static descriptor table of an entity: its storage
//! properties in declaration order plus its alias properties. It is built
//! once with [`RecordType::builder`] and shared behind an `Arc`; every
//! [`Record`] points back at its type and owns all of its mutable state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::alias::{self, AliasProperty, SetContext};
use crate::error::{ApiError, ConversionError, SchemaError};
use crate::key::Key;
use crate::query::QueryDescriptor;
use crate::schema::{self, MessageSchema, SchemaCache, SchemaPurpose, Selection, WireType};
use crate::store::Datastore;
use crate::value::{EnumType, Value};

/// Storage type of a property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyKind {
    String,
    /// Unindexed long string.
    Text,
    Integer,
    Float,
    Boolean,
    /// Unindexed bytes.
    Blob,
    DateTime,
    Date,
    Time,
    GeoPt,
    User,
    Key,
    Enum(Arc<EnumType>),
}

impl PropertyKind {
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (PropertyKind::String | PropertyKind::Text, Value::String(_))
            | (PropertyKind::Integer, Value::Integer(_))
            | (PropertyKind::Float, Value::Float(_))
            | (PropertyKind::Boolean, Value::Bool(_))
            | (PropertyKind::Blob, Value::Bytes(_))
            | (PropertyKind::DateTime, Value::DateTime(_))
            | (PropertyKind::Date, Value::Date(_))
            | (PropertyKind::Time, Value::Time(_))
            | (PropertyKind::GeoPt, Value::GeoPt(_))
            | (PropertyKind::User, Value::User(_))
            | (PropertyKind::Key, Value::Key(_)) => true,
            (PropertyKind::Enum(ty), Value::Enum(v)) => ty.contains(v),
            _ => false,
        }
    }

    /// Whether the kind has a scalar, indexed representation usable in an
    /// equality filter. Composite kinds (`GeoPt`, `User`) and unindexed
    /// kinds (`Text`, `Blob`) are not.
    #[must_use]
    pub fn is_filterable(&self) -> bool {
        !matches!(
            self,
            PropertyKind::GeoPt | PropertyKind::User | PropertyKind::Text | PropertyKind::Blob
        )
    }

    /// Wire type used when the property carries no custom transform.
    #[must_use]
    pub fn default_wire_type(&self) -> WireType {
        match self {
            PropertyKind::String | PropertyKind::Text | PropertyKind::Key => WireType::String,
            PropertyKind::Integer => WireType::Integer,
            PropertyKind::Float => WireType::Float,
            PropertyKind::Boolean => WireType::Boolean,
            PropertyKind::Blob => WireType::Bytes,
            PropertyKind::DateTime | PropertyKind::Date | PropertyKind::Time => WireType::DateTime,
            PropertyKind::GeoPt => WireType::Message(schema::geo_pt_schema()),
            PropertyKind::User => WireType::Message(schema::user_schema()),
            PropertyKind::Enum(ty) => WireType::Enum(Arc::clone(ty)),
        }
    }

    #[must_use]
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            PropertyKind::DateTime | PropertyKind::Date | PropertyKind::Time
        )
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::String => write!(f, "String"),
            PropertyKind::Text => write!(f, "Text"),
            PropertyKind::Integer => write!(f, "Integer"),
            PropertyKind::Float => write!(f, "Float"),
            PropertyKind::Boolean => write!(f, "Boolean"),
            PropertyKind::Blob => write!(f, "Blob"),
            PropertyKind::DateTime => write!(f, "DateTime"),
            PropertyKind::Date => write!(f, "Date"),
            PropertyKind::Time => write!(f, "Time"),
            PropertyKind::GeoPt => write!(f, "GeoPt"),
            PropertyKind::User => write!(f, "User"),
            PropertyKind::Key => write!(f, "Key"),
            PropertyKind::Enum(ty) => write!(f, "Enum({})", ty.name()),
        }
    }
}

type EncodeFn = Arc<dyn Fn(&str, &Value) -> Result<Value, ConversionError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&str, Value) -> Result<Value, ConversionError> + Send + Sync>;

/// Custom encode/decode pair for a property whose wire representation
/// differs from its storage representation.
///
/// Both functions receive the field name for error reporting and operate on
/// a single element; repeated properties apply them per element.
#[derive(Clone)]
pub struct Transform {
    wire: WireType,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl Transform {
    #[must_use]
    pub fn new<E, D>(wire: WireType, encode: E, decode: D) -> Self
    where
        E: Fn(&str, &Value) -> Result<Value, ConversionError> + Send + Sync + 'static,
        D: Fn(&str, Value) -> Result<Value, ConversionError> + Send + Sync + 'static,
    {
        Self {
            wire,
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    #[must_use]
    pub fn wire_type(&self) -> &WireType {
        &self.wire
    }

    pub(crate) fn encode(&self, field: &str, value: &Value) -> Result<Value, ConversionError> {
        (self.encode)(field, value)
    }

    pub(crate) fn decode(&self, field: &str, value: Value) -> Result<Value, ConversionError> {
        (self.decode)(field, value)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("wire", &self.wire)
            .finish_non_exhaustive()
    }
}

/// Assignment of a `User` property from the authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentUser {
    /// Fail decoding with `Unauthorized` when there is no current user.
    pub raise_unauthorized: bool,
}

/// When the store stamps the current time on a temporal property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoStamp {
    /// First put only.
    OnCreate,
    /// Every put.
    Always,
}

/// A stored, typed property of a record type.
#[derive(Clone, Debug)]
pub struct Property {
    name: String,
    kind: PropertyKind,
    required: bool,
    repeated: bool,
    default: Option<Value>,
    auto_stamp: Option<AutoStamp>,
    current_user: Option<CurrentUser>,
    string_format: Option<String>,
    transform: Option<Transform>,
}

impl Property {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            repeated: false,
            default: None,
            auto_stamp: None,
            current_user: None,
            string_format: None,
            transform: None,
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::String)
    }

    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Text)
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Integer)
    }

    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Float)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Boolean)
    }

    #[must_use]
    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Blob)
    }

    #[must_use]
    pub fn date_time(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::DateTime)
    }

    #[must_use]
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Date)
    }

    #[must_use]
    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Time)
    }

    #[must_use]
    pub fn geo_pt(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::GeoPt)
    }

    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::User)
    }

    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Key)
    }

    #[must_use]
    pub fn enumeration(name: impl Into<String>, ty: &Arc<EnumType>) -> Self {
        Self::new(name, PropertyKind::Enum(Arc::clone(ty)))
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn repeated(mut self) -> Self {
        self.repeated = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Stamp the current time on the first put only.
    #[must_use]
    pub fn auto_now_add(mut self) -> Self {
        self.auto_stamp = Some(AutoStamp::OnCreate);
        self
    }

    /// Stamp the current time on every put.
    #[must_use]
    pub fn auto_now(mut self) -> Self {
        self.auto_stamp = Some(AutoStamp::Always);
        self
    }

    /// Assign the property from the request's current user while decoding.
    #[must_use]
    pub fn current_user(mut self, raise_unauthorized: bool) -> Self {
        self.current_user = Some(CurrentUser { raise_unauthorized });
        self
    }

    /// Send a temporal property as a string rendered with a `strftime` format.
    #[must_use]
    pub fn string_format(mut self, format: impl Into<String>) -> Self {
        self.string_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn is_repeated(&self) -> bool {
        self.repeated
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn auto_stamp(&self) -> Option<AutoStamp> {
        self.auto_stamp
    }

    #[must_use]
    pub fn current_user_option(&self) -> Option<CurrentUser> {
        self.current_user
    }

    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.string_format.as_deref()
    }

    #[must_use]
    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    /// Set automatically by the store or the request, never by the client.
    #[must_use]
    pub fn is_automatic(&self) -> bool {
        self.auto_stamp.is_some() || self.current_user.is_some()
    }

    /// Wire type of a single element of this property.
    #[must_use]
    pub fn wire_type(&self) -> WireType {
        if let Some(t) = &self.transform {
            return t.wire_type().clone();
        }
        if self.string_format.is_some() && self.kind.is_temporal() {
            return WireType::String;
        }
        self.kind.default_wire_type()
    }

    /// Whether `value` can be stored in this property as-is.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if self.repeated {
            return value
                .as_list()
                .is_some_and(|items| items.iter().all(|v| self.kind.accepts(v)));
        }
        self.kind.accepts(value)
    }

    /// Type label used in conversion errors.
    #[must_use]
    pub fn type_label(&self) -> String {
        if self.repeated {
            format!("list<{}>", self.kind)
        } else {
            self.kind.to_string()
        }
    }
}

/// A field of a record type resolved by name.
#[derive(Clone, Copy, Debug)]
pub enum FieldRef<'a> {
    Property(&'a Property),
    Alias(&'a AliasProperty),
}

impl FieldRef<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            FieldRef::Property(p) => p.name(),
            FieldRef::Alias(a) => a.name(),
        }
    }
}

/// Static descriptor table of an entity kind.
pub struct RecordType {
    kind: String,
    properties: Vec<Property>,
    aliases: Vec<AliasProperty>,
    message_fields: Option<Selection>,
    schemas: SchemaCache,
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("kind", &self.kind)
            .field("properties", &self.properties)
            .field(
                "aliases",
                &self.aliases.iter().map(AliasProperty::name).collect::<Vec<_>>(),
            )
            .field("message_fields", &self.message_fields)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RecordType`].
#[must_use]
pub struct RecordTypeBuilder {
    kind: String,
    properties: Vec<Property>,
    aliases: Vec<AliasProperty>,
    message_fields: Option<Selection>,
}

impl RecordTypeBuilder {
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare an alias property. An alias named like one of the default
    /// aliases (`id`, `entityKey`, `limit`, `order`, `pageToken`) replaces
    /// the default declaration entirely.
    pub fn alias(mut self, alias: AliasProperty) -> Self {
        self.aliases.push(alias);
        self
    }

    /// Fix the default field list instead of deriving it from declaration order.
    pub fn message_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_fields = Some(Selection::new(names));
        self
    }

    /// Validate the declarations and freeze the record type.
    ///
    /// # Errors
    /// - `SchemaError::DuplicateProperty` when a property or alias name is declared twice
    /// - `SchemaError::InvalidDefault` when a default does not fit its declared type
    /// - `SchemaError::MissingPropertyType` when an alias wire type cannot be inferred
    /// - `SchemaError::UnknownField` / `DuplicateField` for an invalid `message_fields` list
    pub fn build(self) -> Result<Arc<RecordType>, SchemaError> {
        let mut seen = HashSet::new();
        for p in &self.properties {
            if !seen.insert(p.name()) {
                return Err(SchemaError::DuplicateProperty(p.name().to_owned()));
            }
            if let Some(d) = p.default_value()
                && !p.accepts(d)
            {
                return Err(SchemaError::InvalidDefault {
                    field: p.name().to_owned(),
                    expected: p.type_label(),
                });
            }
        }

        let mut aliases = alias::defaults();
        let mut declared = HashSet::new();
        for a in self.aliases {
            if !declared.insert(a.name().to_owned()) {
                return Err(SchemaError::DuplicateProperty(a.name().to_owned()));
            }
            aliases.retain(|x| x.name() != a.name());
            aliases.push(a);
        }
        for a in &aliases {
            let wire = a.resolved_wire_type()?;
            if let Some(d) = a.default_value() {
                let fits = if a.is_repeated() {
                    d.as_list()
                        .is_some_and(|items| items.iter().all(|v| wire.accepts(v)))
                } else {
                    wire.accepts(d)
                };
                if !fits {
                    return Err(SchemaError::InvalidDefault {
                        field: a.name().to_owned(),
                        expected: wire.to_string(),
                    });
                }
            }
        }

        let record_type = RecordType {
            kind: self.kind,
            properties: self.properties,
            aliases,
            message_fields: self.message_fields,
            schemas: SchemaCache::default(),
        };
        if let Some(fields) = &record_type.message_fields {
            fields.validate(&record_type)?;
        }
        debug!(
            kind = %record_type.kind,
            properties = record_type.properties.len(),
            aliases = record_type.aliases.len(),
            "record type declared"
        );
        Ok(Arc::new(record_type))
    }
}

impl RecordType {
    pub fn builder(kind: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder {
            kind: kind.into(),
            properties: Vec::new(),
            aliases: Vec::new(),
            message_fields: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    #[must_use]
    pub fn aliases(&self) -> &[AliasProperty] {
        &self.aliases
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    #[must_use]
    pub fn alias(&self, name: &str) -> Option<&AliasProperty> {
        self.aliases.iter().find(|a| a.name() == name)
    }

    /// Resolve a field name; an alias shadows a property of the same name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        self.alias(name)
            .map(FieldRef::Alias)
            .or_else(|| self.property(name).map(FieldRef::Property))
    }

    /// Field list used when a method does not name its fields: the explicit
    /// `message_fields` if declared, otherwise every property in declaration
    /// order followed by the non-exempt aliases in declaration order.
    #[must_use]
    pub fn default_selection(&self) -> Selection {
        if let Some(fields) = &self.message_fields {
            return fields.clone();
        }
        let mut names: Vec<&str> = self.properties.iter().map(Property::name).collect();
        for a in self.aliases.iter().filter(|a| !a.is_exempt()) {
            if !names.contains(&a.name()) {
                names.push(a.name());
            }
        }
        Selection::new(names)
    }

    /// Response-shaped schema for `selection` (default selection when `None`).
    ///
    /// # Errors
    /// Returns `SchemaError` when the selection names unknown or duplicate fields.
    pub fn schema(&self, selection: Option<&Selection>) -> Result<Arc<MessageSchema>, SchemaError> {
        self.cached(SchemaPurpose::Record, selection)
    }

    /// Like [`RecordType::schema`] but every alias in the selection must be settable.
    ///
    /// # Errors
    /// Additionally returns `SchemaError::ReadOnlyField` for an alias without a setter.
    pub fn request_schema(
        &self,
        selection: Option<&Selection>,
    ) -> Result<Arc<MessageSchema>, SchemaError> {
        let schema = self.schema(selection)?;
        schema::check_settable(self, &schema)?;
        Ok(schema)
    }

    /// Schema of query parameters: properties become optional single-valued
    /// filters, aliases keep their flags.
    ///
    /// # Errors
    /// Returns `SchemaError::UnsupportedFilterType` for a non-filterable property
    /// and `SchemaError::ReadOnlyField` for an alias without a setter.
    pub fn query_schema(&self, selection: &Selection) -> Result<Arc<MessageSchema>, SchemaError> {
        self.cached(SchemaPurpose::Query, Some(selection))
    }

    /// `{items: repeated <item>, nextPageToken}` with items shaped by `selection`.
    ///
    /// # Errors
    /// Returns `SchemaError` when the item selection is invalid.
    pub fn collection_schema(
        &self,
        selection: Option<&Selection>,
    ) -> Result<Arc<MessageSchema>, SchemaError> {
        self.cached(SchemaPurpose::Collection, selection)
    }

    fn cached(
        &self,
        purpose: SchemaPurpose,
        selection: Option<&Selection>,
    ) -> Result<Arc<MessageSchema>, SchemaError> {
        let default;
        let selection = match selection {
            Some(s) => s,
            None => {
                default = self.default_selection();
                &default
            }
        };
        self.schemas
            .get_or_build(purpose, selection, || schema::derive(self, purpose, selection))
    }

    /// Fresh, empty record of this type.
    #[must_use]
    pub fn new_record(self: &Arc<Self>) -> Record {
        Record::new(Arc::clone(self))
    }
}

/// An instance of a record type.
#[derive(Clone, Debug)]
pub struct Record {
    record_type: Arc<RecordType>,
    key: Option<Key>,
    values: HashMap<String, Value>,
    from_datastore: bool,
    query_info: QueryDescriptor,
    alias_set: HashSet<String>,
    transient: HashMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(record_type: Arc<RecordType>) -> Self {
        Self {
            record_type,
            key: None,
            values: HashMap::new(),
            from_datastore: false,
            query_info: QueryDescriptor::default(),
            alias_set: HashSet::new(),
            transient: HashMap::new(),
        }
    }

    /// Rebuild a record from stored state.
    #[must_use]
    pub fn from_stored(record_type: Arc<RecordType>, key: Key, values: HashMap<String, Value>) -> Self {
        let mut record = Self::new(record_type);
        record.key = Some(key);
        record.values = values;
        record.from_datastore = true;
        record
    }

    #[must_use]
    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        self.record_type.kind()
    }

    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: Option<Key>) {
        self.key = key;
    }

    /// True once the record was loaded from, or matched against, persisted state.
    #[must_use]
    pub fn from_datastore(&self) -> bool {
        self.from_datastore
    }

    pub fn set_from_datastore(&mut self, value: bool) {
        self.from_datastore = value;
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Assign a storage property.
    ///
    /// # Errors
    /// `ConversionError::UnknownField` when the record type has no such
    /// property, `ConversionError::TypeMismatch` when the value does not fit.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConversionError> {
        let value = value.into();
        let property = self
            .record_type
            .property(name)
            .ok_or_else(|| ConversionError::UnknownField(name.to_owned()))?;
        if !property.accepts(&value) {
            return Err(ConversionError::mismatch(name, property.type_label(), &value));
        }
        self.values.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    /// Present property values in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.record_type
            .properties()
            .iter()
            .filter_map(|p| self.values.get(p.name()).map(|v| (p.name(), v)))
    }

    pub(crate) fn raw_values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Current value of a field by name: the alias getter for aliases, the
    /// stored value for properties.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<Value> {
        match self.record_type.field(name)? {
            FieldRef::Alias(a) => a.get(self),
            FieldRef::Property(p) => self.values.get(p.name()).cloned(),
        }
    }

    /// Invoke the setter of alias `name`.
    ///
    /// # Errors
    /// Whatever the setter raises; `ConversionError::UnknownField` when the
    /// record type has no such alias.
    pub fn set_alias(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        ctx: &SetContext<'_>,
    ) -> Result<(), ApiError> {
        let record_type = Arc::clone(&self.record_type);
        let alias = record_type
            .alias(name)
            .ok_or_else(|| ConversionError::UnknownField(name.to_owned()))?;
        alias.set(self, value.into(), ctx)?;
        self.alias_set.insert(name.to_owned());
        Ok(())
    }

    #[must_use]
    pub fn is_alias_set(&self, name: &str) -> bool {
        self.alias_set.contains(name)
    }

    #[must_use]
    pub fn query_info(&self) -> &QueryDescriptor {
        &self.query_info
    }

    pub fn query_info_mut(&mut self) -> &mut QueryDescriptor {
        &mut self.query_info
    }

    /// Per-instance scratch values, e.g. key parts held until the key can be composed.
    #[must_use]
    pub fn transient(&self, name: &str) -> Option<&Value> {
        self.transient.get(name)
    }

    pub fn set_transient(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.transient.insert(name.into(), value.into());
    }

    /// Set the key and, when it is complete, merge in the persisted record.
    ///
    /// Values already present on `self` win over persisted ones.
    /// `from_datastore` reports whether a persisted record was found.
    ///
    /// # Errors
    /// `ApiError::BadRequest` when the key names another kind; store failures
    /// are propagated.
    pub fn update_from_key(&mut self, key: Key, store: &dyn Datastore) -> Result<(), ApiError> {
        if key.kind() != self.kind() {
            return Err(ApiError::bad_request(format!(
                "key of kind {} cannot identify a {}",
                key.kind(),
                self.kind()
            )));
        }
        let complete = key.is_complete();
        let found = if complete {
            store.get(&key, &self.record_type)?
        } else {
            None
        };
        debug!(kind = %self.kind(), key = %key, complete, found = found.is_some(), "update from key");
        self.key = Some(key);
        self.from_datastore = found.is_some();
        if let Some(stored) = found {
            for (name, value) in stored.values {
                self.values.entry(name).or_insert(value);
            }
        }
        Ok(())
    }

    /// Apply `auto_now` / `auto_now_add` stamps before a put.
    pub fn stamp_for_put(&mut self, now: DateTime<Utc>) {
        for p in self.record_type.properties() {
            let stamp = match p.auto_stamp {
                Some(AutoStamp::Always) => true,
                Some(AutoStamp::OnCreate) => !self.values.contains_key(p.name()),
                None => false,
            };
            if !stamp {
                continue;
            }
            let value = match p.kind() {
                PropertyKind::DateTime => Value::DateTime(now),
                PropertyKind::Date => Value::Date(now.date_naive()),
                PropertyKind::Time => Value::Time(now.time()),
                _ => continue,
            };
            self.values.insert(p.name().to_owned(), value);
        }
    }

    /// First required property without a value.
    #[must_use]
    pub fn missing_required(&self) -> Option<&str> {
        self.record_type
            .properties()
            .iter()
            .filter(|p| p.is_required())
            .find(|p| match self.values.get(p.name()) {
                None => true,
                Some(Value::List(items)) => items.is_empty(),
                Some(_) => false,
            })
            .map(Property::name)
    }
}
