use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors surfaced by a rendezvous store backend.
///
/// A failed read or write aborts the state transition that triggered it;
/// the coordinator stays in its prior state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store is closed")]
    Closed,
}

/// A single-field write inside a document update.
///
/// The array operations mirror the rendezvous store's atomic
/// union/remove transforms; joiners use them so concurrent list updates
/// never clobber each other.
#[derive(Debug, Clone)]
pub enum FieldWrite {
    Value(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    Delete,
}

pub type Fields = BTreeMap<String, FieldWrite>;

/// A change observed by a watch registration.
///
/// Subscribing replays every existing record as `Added`, once each, so a
/// late subscriber still sees records written before it attached.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added { id: String, doc: Value },
    Modified { id: String, doc: Value },
    Removed { id: String },
}

pub type WatchCallback = Box<dyn Fn(WatchEvent) + Send + Sync>;

/// Registration handle for a watch; releasing it fences the callback so
/// no event is delivered afterwards. Dropping the handle releases too.
pub struct WatchHandle {
    // `Sync` as well as `Send`: handles sit inside coordinators that the
    // session loop borrows across awaits, and the loop runs on a spawned
    // task whose future must be `Send`.
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchHandle {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("released", &self.cancel.is_none())
            .finish()
    }
}

/// A set of documents deleted in one atomic commit.
///
/// Connection teardown relies on this: a connection document and its
/// candidate records disappear together or not at all.
#[derive(Debug, Default)]
pub struct DeleteBatch {
    pub(crate) paths: Vec<String>,
}

impl DeleteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delete(&mut self, doc_path: impl Into<String>) {
        self.paths.push(doc_path.into());
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Watch/write contract over the rendezvous store.
///
/// Consumed, not owned: the storage and replication engine behind it is
/// out of scope. Single-document writes are last-write-wins; the only
/// multi-document guarantee is the batched delete.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Read a document; `Ok(None)` when it does not exist.
    async fn get(&self, doc_path: &str) -> Result<Option<Value>, StoreError>;

    /// Write fields into a document, creating it if needed.
    async fn set_merge(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Write fields into an existing document; `NotFound` otherwise.
    async fn update(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError>;

    /// Append a record with a generated id; returns the id.
    async fn append(&self, collection_path: &str, doc: Value) -> Result<String, StoreError>;

    /// List the direct records of a collection.
    async fn list(&self, collection_path: &str) -> Result<Vec<(String, Value)>, StoreError>;

    /// Delete a single document. Deleting a missing document is a no-op.
    async fn delete(&self, doc_path: &str) -> Result<(), StoreError>;

    /// Atomically delete every document in the batch.
    async fn commit(&self, batch: DeleteBatch) -> Result<(), StoreError>;

    /// Observe a single document.
    fn watch_doc(
        &self,
        doc_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError>;

    /// Observe record-level changes of a collection.
    fn watch_collection(
        &self,
        collection_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError>;
}

/// Shorthand for a plain value write.
pub(crate) fn value_field(value: impl serde::Serialize) -> FieldWrite {
    match serde_json::to_value(value) {
        Ok(v) => FieldWrite::Value(v),
        Err(_) => FieldWrite::Value(Value::Null),
    }
}
