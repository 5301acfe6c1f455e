use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_session::{
    DeleteBatch, Fields, MemoryStore, SignalingStore, StoreError, WatchCallback, WatchHandle,
};

/// Store wrapper that can be armed to reject a chosen write, for
/// exercising all-or-nothing teardown and aborted transitions.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_next_commit: AtomicBool,
    merge_fuse: Mutex<Option<u32>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Reject the `nth` set-merge from now (0 rejects the next one).
    pub fn arm_set_merge(&self, nth: u32) {
        *self.merge_fuse.lock().unwrap() = Some(nth);
    }

    fn merge_should_fail(&self) -> bool {
        let mut fuse = self.merge_fuse.lock().unwrap();
        match fuse.as_mut() {
            Some(0) => {
                *fuse = None;
                true
            }
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl SignalingStore for FailingStore {
    async fn get(&self, doc_path: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(doc_path).await
    }

    async fn set_merge(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError> {
        if self.merge_should_fail() {
            return Err(StoreError::Backend("injected write failure".to_owned()));
        }
        self.inner.set_merge(doc_path, fields).await
    }

    async fn update(&self, doc_path: &str, fields: Fields) -> Result<(), StoreError> {
        self.inner.update(doc_path, fields).await
    }

    async fn append(&self, collection_path: &str, doc: Value) -> Result<String, StoreError> {
        self.inner.append(collection_path, doc).await
    }

    async fn list(&self, collection_path: &str) -> Result<Vec<(String, Value)>, StoreError> {
        self.inner.list(collection_path).await
    }

    async fn delete(&self, doc_path: &str) -> Result<(), StoreError> {
        self.inner.delete(doc_path).await
    }

    async fn commit(&self, batch: DeleteBatch) -> Result<(), StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".to_owned()));
        }
        self.inner.commit(batch).await
    }

    fn watch_doc(
        &self,
        doc_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        self.inner.watch_doc(doc_path, callback)
    }

    fn watch_collection(
        &self,
        collection_path: &str,
        callback: WatchCallback,
    ) -> Result<WatchHandle, StoreError> {
        self.inner.watch_collection(collection_path, callback)
    }
}
