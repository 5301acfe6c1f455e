mod memory_store;
mod signaling_store;

pub use memory_store::MemoryStore;
pub(crate) use signaling_store::value_field;
pub use signaling_store::{
    DeleteBatch, FieldWrite, Fields, SignalingStore, StoreError, WatchCallback, WatchEvent,
    WatchHandle,
};
