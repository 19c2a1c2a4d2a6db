//! The datastore seam.
//!
//! Persistence, key lookups and query execution live behind [`Datastore`].
//! The library only builds keys and queries; a backend executes them.
//! [`MemoryDatastore`] is the in-process backend used by tests and the demo.

use std::sync::Arc;

use thiserror::Error;

use crate::key::Key;
use crate::model::{Record, RecordType};
use crate::query::{Cursor, Query};

pub mod memory;

pub use memory::MemoryDatastore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record of kind {got} cannot be stored under a {expected} key")]
    KindMismatch { expected: String, got: String },

    #[error("key {0} has an incomplete ancestor")]
    IncompleteAncestor(String),

    #[error("entity {kind} is missing required property '{property}'")]
    RequiredPropertyMissing { kind: String, property: String },

    #[error("invalid query cursor")]
    InvalidCursor,

    #[error("datastore failure: {0}")]
    Backend(String),
}

/// One page of query results.
#[derive(Clone, Debug)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Position after the last returned record.
    pub cursor: Option<Cursor>,
    /// More results exist past this page.
    pub more: bool,
}

pub trait Datastore: Send + Sync {
    /// Fetch the record stored under `key`, typed as `record_type`.
    ///
    /// # Errors
    /// Backend failures.
    fn get(&self, key: &Key, record_type: &Arc<RecordType>) -> Result<Option<Record>, StoreError>;

    /// # Errors
    /// Backend failures.
    fn exists(&self, key: &Key) -> Result<bool, StoreError>;

    /// Persist `record`, allocating an id when its key is missing or
    /// incomplete, and write the final key back into the record.
    ///
    /// # Errors
    /// `StoreError::RequiredPropertyMissing`, `StoreError::KindMismatch`,
    /// `StoreError::IncompleteAncestor` or backend failures.
    fn put(&self, record: &mut Record) -> Result<Key, StoreError>;

    /// Persist several records. Not atomic: records before a failure stay written.
    ///
    /// # Errors
    /// The first error raised by [`Datastore::put`].
    fn put_multi(&self, records: &mut [Record]) -> Result<Vec<Key>, StoreError> {
        records.iter_mut().map(|r| self.put(r)).collect()
    }

    /// Returns whether a record was removed.
    ///
    /// # Errors
    /// Backend failures.
    fn delete(&self, key: &Key) -> Result<bool, StoreError>;

    /// Run `query` and return at most `page_size` records starting at the
    /// query cursor.
    ///
    /// # Errors
    /// `StoreError::InvalidCursor` when the cursor was not issued by this
    /// store, or backend failures.
    fn fetch_page(
        &self,
        query: &Query,
        record_type: &Arc<RecordType>,
        page_size: u32,
    ) -> Result<QueryPage, StoreError>;
}
