use crate::store::signaling_store::{
    DeleteBatch, FieldWrite, Fields, SignalingStore, StoreError, WatchCallback, WatchEvent,
    WatchHandle,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;
use uuid::Uuid;

/// In-process rendezvous store.
///
/// Implements the full watch/write contract over a document map, with
/// record-added replay on subscription and atomic batched deletes. Serves
/// as the deterministic backend for tests and as an in-process rendezvous
/// for co-located sessions.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Serializes every mutation and its watcher notifications, so all
    /// watchers observe writes in one global order.
    write_lock: Mutex<()>,
    documents: DashMap<String, DocEntry>,
    watchers: DashMap<u64, Watcher>,
    next_watch: AtomicU64,
    next_seq: AtomicU64,
}

struct DocEntry {
    value: Value,
    seq: u64,
}

enum WatchTarget {
    Doc(String),
    Collection(String),
}

struct Watcher {
    target: WatchTarget,
    callback: WatchCallback,
    released: Arc<AtomicBool>,
}

fn split_path(doc_path: &str) -> (&str, &str) {
    match doc_path.rsplit_once('/') {
        Some((collection, id)) => (collection, id),
        None => ("", doc_path),
    }
}

fn apply_fields(doc: &mut Value, fields: Fields) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let obj = doc.as_object_mut().expect("document is an object");

    for (key, write) in fields {
        match write {
            FieldWrite::Value(v) => {
                obj.insert(key, v);
            }
            FieldWrite::ArrayUnion(vs) => {
                let entry = obj.entry(key).or_insert_with(|| Value::Array(Vec::new()));
                if let Some(arr) = entry.as_array_mut() {
                    for v in vs {
                        if !arr.contains(&v) {
                            arr.push(v);
                        }
                    }
                }
            }
            FieldWrite::ArrayRemove(vs) => {
                if let Some(arr) = obj.get_mut(&key).and_then(Value::as_array_mut) {
                    arr.retain(|x| !vs.contains(x));
                }
            }
            FieldWrite::Delete => {
                obj.remove(&key);
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                write_lock: Mutex::new(()),
                documents: DashMap::new(),
                watchers: DashMap::new(),
                next_watch: AtomicU64::new(0),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    fn register(&self, target: WatchTarget, callback: WatchCallback) -> WatchHandle {
        let inner = &self.inner;
        let _guard = inner.write_lock.lock().expect("store lock poisoned");

        // Replay existing records as Added before any live event, in
        // insertion order.
        let mut existing: Vec<(u64, String, Value)> = Vec::new();
        match &target {
            WatchTarget::Doc(path) => {
                if let Some(entry) = inner.documents.get(path) {
                    let (_, id) = split_path(path);
                    existing.push((entry.seq, id.to_owned(), entry.value.clone()));
                }
            }
            WatchTarget::Collection(path) => {
                for entry in inner.documents.iter() {
                    let (collection, id) = split_path(entry.key());
                    if collection == path {
                        existing.push((entry.value().seq, id.to_owned(), entry.value().value.clone()));
                    }
                }
                existing.sort_by_key(|(seq, _, _)| *seq);
            }
        }
        for (_, id, doc) in existing {
            callback(WatchEvent::Added { id, doc });
        }

        let id = inner.next_watch.fetch_add(1, Ordering::Relaxed);
        let released = Arc::new(AtomicBool::new(false));
        inner.watchers.insert(
            id,
            Watcher {
                target,
                callback,
                released: released.clone(),
            },
        );

        let weak: Weak<StoreInner> = Arc::downgrade(inner);
        WatchHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                // Take the write lock so no notification is in flight
                // when the fence goes up.
                let _guard = inner.write_lock.lock().expect("store lock poisoned");
                released.store(true, Ordering::SeqCst);
                inner.watchers.remove(&id);
            }
        })
    }

    /// Must be called while holding `write_lock`.
    fn notify(&self, doc_path: &str, event: &WatchEvent) {
        let (collection, _) = split_path(doc_path);
        for watcher in self.inner.watchers.iter() {
            if watcher.released.load(Ordering::SeqCst) {
                continue;
            }
            let matches = match &watcher.target {
                WatchTarget::Doc(path) => path == doc_path,
                WatchTarget::Collection(path) => path == collection,
            };
            if matches {
                (watcher.callback)(event.clone());
            }
        }
    }

    fn write(&self, doc_path: &str, fields: Fields, require_existing: bool) -> Result<(), StoreError> {
        let _guard = self.inner.write_lock.lock().expect("store lock poisoned");

        let existed = self.inner.documents.contains_key(doc_path);
        if require_existing && !existed {
            return Err(StoreError::NotFound(doc_path.to_owned()));
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut entry = self
            .inner
            .documents
            .entry(doc_path.to_owned())
            .or_insert_with(|| DocEntry {
                value: Value::Object(Map::new()),
                seq,
            });
        apply_fields(&mut entry.value, fields);
        let doc = entry.value.clone();
        drop(entry);

        let (_, id) = split_path(doc_path);
        let event = if existed {
            WatchEvent::Modified {
                id: id.to_owned(),
                doc,
            }
        } else {
            WatchEvent::Added {
                id: id.to_owned(),
                doc,
            }
        };
        self.notify(doc_path, &event);
        Ok(())
    }

    /// Must be called while holding `write_lock`.
    fn remove(&self, doc_path: &str) {
        if self.inner.documents.remove(doc_path).is_some() {
            let (_, id) = split_path(doc_path);
            let event = WatchEvent::Removed { id: id.to_owned() };
            self.notify(doc_path, &event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn get(&self, doc_path: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .inner
            .documents
            .get(doc_path)
            .map(|entry| entry.value.clone()))
    }

    async fn set_merge(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError> {
        self.write(doc_path, fields, false)
    }

    async fn update(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError> {
        self.write(doc_path, fields, true)
    }

    async fn append(&self, collection_path: &str, doc: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let path = format!("{collection_path}/{id}");

        let _guard = self.inner.write_lock.lock().expect("store lock poisoned");
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        self.inner.documents.insert(
            path.clone(),
            DocEntry {
                value: doc.clone(),
                seq,
            },
        );
        self.notify(
            &path,
            &WatchEvent::Added {
                id: id.clone(),
                doc,
            },
        );
        Ok(id)
    }

    async fn list(&self, collection_path: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut records: Vec<(u64, String, Value)> = self
            .inner
            .documents
            .iter()
            .filter_map(|entry| {
                let (collection, id) = split_path(entry.key());
                (collection == collection_path)
                    .then(|| (entry.value().seq, id.to_owned(), entry.value().value.clone()))
            })
            .collect();
        records.sort_by_key(|(seq, _, _)| *seq);
        Ok(records.into_iter().map(|(_, id, doc)| (id, doc)).collect())
    }

    async fn delete(&self, doc_path: &str) -> Result<(), StoreError> {
        let _guard = self.inner.write_lock.lock().expect("store lock poisoned");
        self.remove(doc_path);
        Ok(())
    }

    async fn commit(&self, batch: DeleteBatch) -> Result<(), StoreError> {
        debug!(docs = batch.len(), "committing batched delete");
        let guard = self.inner.write_lock.lock().expect("store lock poisoned");
        for path in &batch.paths {
            self.remove(path);
        }
        drop(guard);
        Ok(())
    }

    fn watch_doc(
        &self,
        doc_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        Ok(self.register(WatchTarget::Doc(doc_path.to_owned()), callback))
    }

    fn watch_collection(
        &self,
        collection_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        Ok(self.register(WatchTarget::Collection(collection_path.to_owned()), callback))
    }
}
