use crate::store::{SignalingStore, StoreError, WatchEvent, WatchHandle};
use crate::transport::PeerTransport;
use std::collections::HashSet;
use std::sync::Arc;
use tether_core::CandidateDoc;
use tracing::{debug, warn};

/// Bidirectional ICE candidate pipe for one connection.
///
/// Local candidates are appended to this side's sub-collection; remote
/// records arrive through a collection watch. Remote candidates are
/// buffered until the remote description is in place, then applied in
/// arrival order. Records are deduplicated by id so a watch replay after
/// resubscription applies nothing twice.
pub struct CandidateRelay {
    store: Arc<dyn SignalingStore>,
    transport: Arc<dyn PeerTransport>,
    local_coll: String,
    remote_coll: String,
    seen: HashSet<String>,
    pending: Vec<CandidateDoc>,
    remote_ready: bool,
    watch: Option<WatchHandle>,
}

impl CandidateRelay {
    pub fn new(
        store: Arc<dyn SignalingStore>,
        transport: Arc<dyn PeerTransport>,
        local_coll: String,
        remote_coll: String,
    ) -> Self {
        Self {
            store,
            transport,
            local_coll,
            remote_coll,
            seen: HashSet::new(),
            pending: Vec::new(),
            remote_ready: false,
            watch: None,
        }
    }

    /// Start observing the remote sub-collection. `notify` runs on every
    /// record event; route it back into the owning event loop.
    pub fn subscribe(
        &mut self,
        notify: impl Fn(WatchEvent) + Send + Sync + 'static,
    ) -> Result<(), StoreError> {
        let handle = self
            .store
            .watch_collection(&self.remote_coll, Box::new(notify))?;
        self.watch = Some(handle);
        Ok(())
    }

    /// Publish a locally gathered candidate.
    pub async fn publish_local(&self, doc: CandidateDoc) -> Result<(), StoreError> {
        let value = serde_json::to_value(&doc)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let id = self.store.append(&self.local_coll, value).await?;
        debug!(collection = %self.local_coll, %id, "published local candidate");
        Ok(())
    }

    /// Handle one record from the remote sub-collection watch.
    ///
    /// A rejected candidate is logged and skipped; trickling means the
    /// rest of the batch can still complete the connection.
    pub async fn on_remote_record(&mut self, id: &str, doc: CandidateDoc) {
        if !self.seen.insert(id.to_owned()) {
            debug!(%id, "duplicate candidate record ignored");
            return;
        }
        if !self.remote_ready {
            self.pending.push(doc);
            return;
        }
        self.apply(doc).await;
    }

    /// The remote description is set; flush buffered candidates and apply
    /// later arrivals immediately.
    pub async fn mark_remote_ready(&mut self) {
        self.remote_ready = true;
        let buffered = std::mem::take(&mut self.pending);
        for doc in buffered {
            self.apply(doc).await;
        }
    }

    /// Stop observing; no candidate is applied after this returns.
    pub fn release(&mut self) {
        if let Some(handle) = self.watch.take() {
            handle.unsubscribe();
        }
    }

    async fn apply(&self, doc: CandidateDoc) {
        if let Err(error) = self.transport.add_ice_candidate(doc).await {
            warn!(collection = %self.remote_coll, %error, "candidate rejected, skipping");
        }
    }
}
