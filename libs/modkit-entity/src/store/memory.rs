//! In-process datastore.
//!
//! - Records live in a `BTreeMap` ordered by key, so unordered queries
//!   return records in key order.
//! - Integer ids are allocated from a single counter shared by all kinds,
//!   skipping ids already in use.
//! - Cursors are offsets into the sorted result set; a cursor stays valid
//!   only while the matching set is unchanged.
//! - Ordered queries skip records missing any of the sort properties.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Datastore, QueryPage, StoreError};
use crate::key::Key;
use crate::model::{Record, RecordType};
use crate::query::{Cursor, OrderBy, Query, SortDir};
use crate::value::Value;

type StoredValues = HashMap<String, Value>;

#[derive(Default)]
struct Inner {
    entities: BTreeMap<Key, StoredValues>,
    last_id: i64,
}

#[derive(Default)]
pub struct MemoryDatastore {
    inner: RwLock<Inner>,
}

#[derive(Serialize, Deserialize)]
struct OffsetCursor {
    v: u8,
    offset: usize,
}

impl MemoryDatastore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entities.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entities.clear();
        inner.last_id = 0;
    }
}

fn encode_offset(offset: usize) -> Result<Cursor, StoreError> {
    serde_json::to_vec(&OffsetCursor { v: 1, offset })
        .map(Cursor::new)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode_offset(cursor: &Cursor) -> Result<usize, StoreError> {
    let wire: OffsetCursor =
        serde_json::from_slice(cursor.as_bytes()).map_err(|_| StoreError::InvalidCursor)?;
    if wire.v != 1 {
        return Err(StoreError::InvalidCursor);
    }
    Ok(wire.offset)
}

fn matches_filter(stored: Option<&Value>, expected: &Value) -> bool {
    match stored {
        Some(Value::List(items)) => items.contains(expected),
        Some(value) => value == expected,
        None => false,
    }
}

fn compare(a: (&Key, &StoredValues), b: (&Key, &StoredValues), order: &OrderBy) -> Ordering {
    for key in order.keys() {
        let ord = match (a.1.get(&key.field), b.1.get(&key.field)) {
            (Some(x), Some(y)) => x.sort_cmp(y),
            (x, y) => x.is_some().cmp(&y.is_some()),
        };
        let ord = match key.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.0.cmp(b.0)
}

impl Datastore for MemoryDatastore {
    fn get(&self, key: &Key, record_type: &Arc<RecordType>) -> Result<Option<Record>, StoreError> {
        if key.kind() != record_type.kind() {
            return Err(StoreError::KindMismatch {
                expected: key.kind().to_owned(),
                got: record_type.kind().to_owned(),
            });
        }
        let inner = self.inner.read();
        Ok(inner
            .entities
            .get(key)
            .map(|values| Record::from_stored(Arc::clone(record_type), key.clone(), values.clone())))
    }

    fn exists(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.inner.read().entities.contains_key(key))
    }

    fn put(&self, record: &mut Record) -> Result<Key, StoreError> {
        let key = record
            .key()
            .cloned()
            .unwrap_or_else(|| Key::incomplete(record.kind()));
        if key.kind() != record.kind() {
            return Err(StoreError::KindMismatch {
                expected: key.kind().to_owned(),
                got: record.kind().to_owned(),
            });
        }
        if key.parent().is_some_and(|p| !p.is_complete()) {
            return Err(StoreError::IncompleteAncestor(key.to_string()));
        }
        // Stamps land on the caller's record only once the put succeeds.
        let mut staged = record.clone();
        staged.stamp_for_put(Utc::now());
        if let Some(property) = staged.missing_required() {
            return Err(StoreError::RequiredPropertyMissing {
                kind: record.kind().to_owned(),
                property: property.to_owned(),
            });
        }

        let mut inner = self.inner.write();
        let key = if key.is_complete() {
            key
        } else {
            loop {
                inner.last_id += 1;
                let candidate = key.with_id(inner.last_id);
                if !inner.entities.contains_key(&candidate) {
                    break candidate;
                }
            }
        };
        inner
            .entities
            .insert(key.clone(), staged.raw_values().clone());
        drop(inner);

        debug!(key = %key, "stored record");
        staged.set_key(Some(key.clone()));
        *record = staged;
        Ok(key)
    }

    fn delete(&self, key: &Key) -> Result<bool, StoreError> {
        Ok(self.inner.write().entities.remove(key).is_some())
    }

    #[instrument(skip_all, fields(kind = %query.kind(), page_size = page_size))]
    fn fetch_page(
        &self,
        query: &Query,
        record_type: &Arc<RecordType>,
        page_size: u32,
    ) -> Result<QueryPage, StoreError> {
        let offset = query.cursor().map(decode_offset).transpose()?.unwrap_or(0);
        let inner = self.inner.read();
        let mut matched: Vec<(&Key, &StoredValues)> = inner
            .entities
            .iter()
            .filter(|(key, values)| {
                key.kind() == query.kind()
                    && query.ancestor().is_none_or(|a| key.has_ancestor(a))
                    && query
                        .filters()
                        .iter()
                        .all(|f| matches_filter(values.get(&f.field), &f.value))
                    && query
                        .order()
                        .keys()
                        .iter()
                        .all(|o| values.contains_key(&o.field))
            })
            .collect();
        matched.sort_by(|a, b| compare(*a, *b, query.order()));

        let total = matched.len();
        let page_size = usize::try_from(page_size).unwrap_or(usize::MAX);
        let records: Vec<Record> = matched
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|(key, values)| {
                Record::from_stored(Arc::clone(record_type), (*key).clone(), (*values).clone())
            })
            .collect();
        let end = offset.saturating_add(records.len());
        let more = end < total;
        debug!(matched = total, returned = records.len(), more, "fetched page");
        Ok(QueryPage {
            records,
            cursor: Some(encode_offset(end)?),
            more,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::key::KeyId;
    use crate::model::Property;

    fn my_model() -> Arc<RecordType> {
        RecordType::builder("MyModel")
            .property(Property::string("attr1"))
            .property(Property::integer("rank"))
            .property(Property::string("tags").repeated())
            .property(Property::date_time("created").auto_now_add())
            .build()
            .unwrap()
    }

    fn insert(store: &MemoryDatastore, rt: &Arc<RecordType>, attr1: &str, rank: i64) -> Key {
        let mut record = rt.new_record();
        record.set("attr1", attr1).unwrap();
        record.set("rank", rank).unwrap();
        store.put(&mut record).unwrap()
    }

    #[test]
    fn put_allocates_ids_and_stamps() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        let mut record = rt.new_record();
        record.set("attr1", "a").unwrap();
        assert!(record.get("created").is_none());
        let key = store.put(&mut record).unwrap();
        assert!(key.is_complete());
        assert_eq!(record.key(), Some(&key));
        assert!(record.get("created").is_some());
        assert!(store.exists(&key).unwrap());
        let loaded = store.get(&key, &rt).unwrap().unwrap();
        assert!(loaded.from_datastore());
        assert_eq!(loaded.get("attr1"), Some(&Value::from("a")));
    }

    #[test]
    fn allocation_skips_explicit_ids() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        let mut taken = rt.new_record();
        taken.set_key(Some(Key::new("MyModel", 1)));
        store.put(&mut taken).unwrap();
        let fresh = insert(&store, &rt, "b", 0);
        assert_eq!(fresh.integer_id(), Some(2));
    }

    #[test]
    fn put_checks_required_and_kind() {
        let rt = RecordType::builder("Strict")
            .property(Property::string("name").required())
            .build()
            .unwrap();
        let store = MemoryDatastore::new();
        let mut record = rt.new_record();
        assert_eq!(
            store.put(&mut record),
            Err(StoreError::RequiredPropertyMissing {
                kind: "Strict".to_owned(),
                property: "name".to_owned()
            })
        );
        record.set("name", "n").unwrap();
        record.set_key(Some(Key::new("Other", 1)));
        assert!(matches!(
            store.put(&mut record),
            Err(StoreError::KindMismatch { .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn rejected_put_leaves_the_record_unstamped() {
        let rt = RecordType::builder("Strict")
            .property(Property::string("name").required())
            .property(Property::date_time("touched").auto_now())
            .property(Property::date_time("created").auto_now_add())
            .build()
            .unwrap();
        let store = MemoryDatastore::new();
        let mut record = rt.new_record();
        assert!(store.put(&mut record).is_err());
        assert!(record.get("touched").is_none());
        assert!(record.get("created").is_none());
        assert!(record.key().is_none());

        record.set("name", "n").unwrap();
        store.put(&mut record).unwrap();
        assert!(record.get("touched").is_some());
        assert!(record.get("created").is_some());
    }

    #[test]
    fn delete_removes_record() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        let key = insert(&store, &rt, "a", 1);
        assert!(store.delete(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert!(store.get(&key, &rt).unwrap().is_none());
    }

    #[test]
    fn pages_through_ordered_results() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        for (name, rank) in [("a", 3), ("b", 1), ("c", 2), ("d", 5), ("e", 4)] {
            insert(&store, &rt, name, rank);
        }
        let query = Query::new("MyModel").order_by(OrderBy::parse("-rank").unwrap());

        let first = store.fetch_page(&query, &rt, 2).unwrap();
        let names: Vec<_> = first
            .records
            .iter()
            .map(|r| r.get("attr1").unwrap().clone())
            .collect();
        assert_eq!(names, [Value::from("d"), Value::from("e")]);
        assert!(first.more);

        let rest = query.clone().with_cursor(first.cursor.unwrap());
        let second = store.fetch_page(&rest, &rt, 10).unwrap();
        assert_eq!(second.records.len(), 3);
        assert!(!second.more);
    }

    #[test]
    fn filters_ancestors_and_repeated_values() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        let parent = Key::new("MyParent", "p");
        let mut child = rt.new_record();
        child.set_key(Some(parent.child("MyModel", Some(KeyId::from("c")))));
        child.set("attr1", "x").unwrap();
        child
            .set("tags", vec![Value::from("red"), Value::from("blue")])
            .unwrap();
        store.put(&mut child).unwrap();
        insert(&store, &rt, "x", 1);

        let by_attr = Query::new("MyModel").filter("attr1", "x");
        assert_eq!(store.fetch_page(&by_attr, &rt, 10).unwrap().records.len(), 2);

        let by_parent = by_attr.clone().with_ancestor(parent);
        assert_eq!(store.fetch_page(&by_parent, &rt, 10).unwrap().records.len(), 1);

        let by_tag = Query::new("MyModel").filter("tags", "blue");
        assert_eq!(store.fetch_page(&by_tag, &rt, 10).unwrap().records.len(), 1);
    }

    #[test]
    fn foreign_cursor_is_rejected() {
        let rt = my_model();
        let store = MemoryDatastore::new();
        let query = Query::new("MyModel").with_cursor(Cursor::new(b"nope".to_vec()));
        assert!(matches!(
            store.fetch_page(&query, &rt, 1),
            Err(StoreError::InvalidCursor)
        ));
    }
}
