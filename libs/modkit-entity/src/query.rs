//! Query descriptors and query construction.
//!
//! Alias setters fill a record's [`QueryDescriptor`] while a list request is
//! decoded; [`build_query`] then combines it with the equality filters taken
//! from the request into a [`Query`] for the datastore.

use std::fmt;

use base64::Engine;

use crate::error::{QueryError, SchemaError};
use crate::key::Key;
use crate::model::{FieldRef, Record, RecordType};
use crate::schema::MessageSchema;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

/// Ordered sort keys, written as `"attr1,-attr2"`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct OrderBy(pub Vec<OrderKey>);

impl OrderBy {
    pub fn empty() -> Self {
        Self(vec![])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[OrderKey] {
        &self.0
    }

    /// Parse comma separated names, each optionally prefixed with `-`
    /// (descending) or `+` (ascending, the default).
    ///
    /// # Errors
    /// `QueryError::InvalidOrder` for an empty order or an empty name.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let mut out = Vec::new();
        for seg in raw.split(',') {
            let seg = seg.trim();
            if seg.is_empty() {
                continue;
            }
            let (dir, name) = if let Some(rest) = seg.strip_prefix('-') {
                (SortDir::Desc, rest)
            } else if let Some(rest) = seg.strip_prefix('+') {
                (SortDir::Asc, rest)
            } else {
                (SortDir::Asc, seg)
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(QueryError::InvalidOrder(seg.to_owned()));
            }
            out.push(OrderKey {
                field: name.to_owned(),
                dir,
            });
        }
        if out.is_empty() {
            return Err(QueryError::InvalidOrder("empty order".to_owned()));
        }
        Ok(Self(out))
    }

    pub fn then(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.0.push(OrderKey {
            field: field.into(),
            dir,
        });
        self
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match key.dir {
                SortDir::Asc => write!(f, "{}", key.field)?,
                SortDir::Desc => write!(f, "-{}", key.field)?,
            }
        }
        Ok(())
    }
}

/// Opaque query position. Its bytes are owned by the datastore that issued
/// it; clients only ever see the web-safe string form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cursor(Vec<u8>);

impl Cursor {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_websafe(&self) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// # Errors
    /// `QueryError::InvalidCursor` for an empty or non-base64url token.
    pub fn from_websafe(token: &str) -> Result<Self, QueryError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(QueryError::InvalidCursor);
        }
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map(Self)
            .map_err(|_| QueryError::InvalidCursor)
    }
}

/// Query state accumulated by alias setters during request decoding.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryDescriptor {
    pub ancestor: Option<Key>,
    pub order: Option<OrderBy>,
    /// Order exactly as the client sent it.
    pub order_raw: Option<String>,
    pub cursor: Option<Cursor>,
    /// Page token exactly as the client sent it.
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EqualityFilter {
    pub field: String,
    pub value: Value,
}

/// Datastore query description. Constructed here, executed by a
/// [`crate::store::Datastore`].
#[derive(Clone, Debug, PartialEq)]
#[must_use]
pub struct Query {
    kind: String,
    ancestor: Option<Key>,
    filters: Vec<EqualityFilter>,
    order: OrderBy,
    limit: Option<u32>,
    cursor: Option<Cursor>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ancestor: None,
            filters: Vec::new(),
            order: OrderBy::empty(),
            limit: None,
            cursor: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(EqualityFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    #[must_use]
    pub fn filters(&self) -> &[EqualityFilter] {
        &self.filters
    }

    pub fn order(&self) -> &OrderBy {
        &self.order
    }

    #[must_use]
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    #[must_use]
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }
}

/// Build the datastore query for `record_type` from the decoded descriptor
/// and equality filters.
///
/// # Errors
/// `SchemaError::UnknownField` for a filter on a name that is not a
/// property, `SchemaError::UnsupportedFilterType` for a property kind that
/// cannot be filtered on.
pub fn build_query(
    record_type: &RecordType,
    descriptor: &QueryDescriptor,
    filters: Vec<EqualityFilter>,
) -> Result<Query, SchemaError> {
    let mut query = Query::new(record_type.kind());
    for f in filters {
        let Some(property) = record_type.property(&f.field) else {
            return Err(SchemaError::UnknownField {
                record: record_type.kind().to_owned(),
                field: f.field,
            });
        };
        if !property.kind().is_filterable() {
            return Err(SchemaError::UnsupportedFilterType {
                field: f.field,
                kind: property.kind().to_string(),
            });
        }
        query.filters.push(f);
    }
    if let Some(ancestor) = &descriptor.ancestor {
        query = query.with_ancestor(ancestor.clone());
    }
    if let Some(order) = &descriptor.order {
        query = query.order_by(order.clone());
    }
    if let Some(limit) = descriptor.limit {
        query = query.with_limit(limit);
    }
    if let Some(cursor) = &descriptor.cursor {
        query = query.with_cursor(cursor.clone());
    }
    Ok(query)
}

/// Equality filters for every property field of `schema` set on `record`.
/// A repeated property contributes one filter per element.
#[must_use]
pub fn filters_from_record(record: &Record, schema: &MessageSchema) -> Vec<EqualityFilter> {
    let record_type = record.record_type();
    let mut out = Vec::new();
    for name in schema.field_names() {
        let Some(FieldRef::Property(property)) = record_type.field(name) else {
            continue;
        };
        match record.get(property.name()) {
            Some(Value::List(items)) => out.extend(items.iter().map(|v| EqualityFilter {
                field: property.name().to_owned(),
                value: v.clone(),
            })),
            Some(value) => out.push(EqualityFilter {
                field: property.name().to_owned(),
                value: value.clone(),
            }),
            None => {}
        }
    }
    out
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::model::Property;

    #[test]
    fn order_parse_and_display() {
        let order = OrderBy::parse(" attr1 , -attr2,+attr3 ").unwrap();
        assert_eq!(order.keys().len(), 3);
        assert_eq!(order.keys()[1].dir, SortDir::Desc);
        assert_eq!(order.to_string(), "attr1,-attr2,attr3");
        assert!(OrderBy::parse(",,").is_err());
        assert_eq!(
            OrderBy::parse("attr1,-"),
            Err(QueryError::InvalidOrder("-".to_owned()))
        );
    }

    #[test]
    fn cursor_websafe_round_trip() {
        let cursor = Cursor::new(vec![0xfb, 0xff, 0x00, 0x10]);
        let token = cursor.to_websafe();
        assert!(!token.contains('+') && !token.contains('/'));
        assert_eq!(Cursor::from_websafe(&token).unwrap(), cursor);
        assert_eq!(Cursor::from_websafe(""), Err(QueryError::InvalidCursor));
        assert_eq!(Cursor::from_websafe("a*b"), Err(QueryError::InvalidCursor));
    }

    #[test]
    fn build_query_combines_descriptor_and_filters() {
        let rt = RecordType::builder("MyModel")
            .property(Property::string("attr1"))
            .property(Property::geo_pt("where"))
            .build()
            .unwrap();
        let descriptor = QueryDescriptor {
            ancestor: Some(Key::new("MyParent", "p")),
            order: Some(OrderBy::parse("-attr1").unwrap()),
            limit: Some(5),
            ..QueryDescriptor::default()
        };
        let query = build_query(
            &rt,
            &descriptor,
            vec![EqualityFilter {
                field: "attr1".to_owned(),
                value: Value::from("x"),
            }],
        )
        .unwrap();
        assert_eq!(query.kind(), "MyModel");
        assert_eq!(query.ancestor(), Some(&Key::new("MyParent", "p")));
        assert_eq!(query.filters().len(), 1);
        assert_eq!(query.order().to_string(), "-attr1");
        assert_eq!(query.limit(), Some(5));
        assert!(query.cursor().is_none());

        let err = build_query(
            &rt,
            &QueryDescriptor::default(),
            vec![EqualityFilter {
                field: "where".to_owned(),
                value: Value::from("x"),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedFilterType { .. }));
    }

    #[test]
    fn filters_skip_aliases_and_unset_fields() {
        let rt = RecordType::builder("MyModel")
            .property(Property::string("attr1"))
            .property(Property::string("attr2"))
            .property(Property::string("tags").repeated())
            .build()
            .unwrap();
        let schema = rt
            .query_schema(&crate::schema::Selection::new(["attr1", "attr2", "tags", "limit"]))
            .unwrap();
        let mut record = rt.new_record();
        record.set("attr1", "a").unwrap();
        record
            .set("tags", vec![Value::from("x"), Value::from("y")])
            .unwrap();
        record.query_info_mut().limit = Some(3);
        let filters = filters_from_record(&record, &schema);
        let fields: Vec<_> = filters.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, ["attr1", "tags", "tags"]);
    }
}
