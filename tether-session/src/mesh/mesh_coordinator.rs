use crate::negotiation::NegotiationCoordinator;
use crate::session::{SessionError, SessionEvent};
use crate::store::{SignalingStore, StoreError, WatchEvent, WatchHandle};
use crate::transport::{TransportEvent, TransportFactory};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tether_core::{ConnectionDoc, ConnectionId, MediaTrack, ParticipantId, RoomId, paths};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Store watch notifications, routed back into the session loop so every
/// negotiation step runs on one task.
#[derive(Debug)]
pub(crate) enum SignalNotice {
    /// Record event on the room's connections collection.
    Discovery(WatchEvent),
    /// Event on a connection document owned by one coordinator.
    ConnectionDoc {
        peer: ParticipantId,
        event: WatchEvent,
    },
    /// Record event on a peer's candidate sub-collection.
    Candidate {
        peer: ParticipantId,
        event: WatchEvent,
    },
}

/// Owns one [`NegotiationCoordinator`] per remote participant and the
/// room-level discovery watch that creates the answering side of each
/// connection.
pub struct MeshCoordinator {
    local: ParticipantId,
    room: RoomId,
    store: Arc<dyn SignalingStore>,
    factory: Arc<dyn TransportFactory>,
    signal_tx: mpsc::UnboundedSender<SignalNotice>,
    transport_tx: mpsc::Sender<TransportEvent>,
    events: mpsc::UnboundedSender<SessionEvent>,
    connections: HashMap<ParticipantId, NegotiationCoordinator>,
    discovery: Option<WatchHandle>,
}

impl MeshCoordinator {
    pub(crate) fn new(
        local: ParticipantId,
        room: RoomId,
        store: Arc<dyn SignalingStore>,
        factory: Arc<dyn TransportFactory>,
        signal_tx: mpsc::UnboundedSender<SignalNotice>,
        transport_tx: mpsc::Sender<TransportEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            local,
            room,
            store,
            factory,
            signal_tx,
            transport_tx,
            events,
            connections: HashMap::new(),
            discovery: None,
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// Fresh local identity; only valid before any connection is opened.
    pub fn regenerate_local(&mut self) {
        self.local.regenerate();
    }

    pub fn coordinator_mut(
        &mut self,
        peer: ParticipantId,
    ) -> Option<&mut NegotiationCoordinator> {
        self.connections.get_mut(&peer)
    }

    /// Watch the room's connections collection. Subscribing replays
    /// existing records, so connections opened before this call are still
    /// discovered.
    pub fn start_discovery(&mut self) -> Result<(), StoreError> {
        let tx = self.signal_tx.clone();
        let handle = self.store.watch_collection(
            &paths::connections(&self.room),
            Box::new(move |event| {
                let _ = tx.send(SignalNotice::Discovery(event));
            }),
        )?;
        self.discovery = Some(handle);
        Ok(())
    }

    pub fn stop_discovery(&mut self) {
        if let Some(handle) = self.discovery.take() {
            handle.unsubscribe();
        }
    }

    /// Open the offering side of a connection to `peer`: fresh transport,
    /// fresh document id, message channel, then the initial offer.
    pub async fn open_offering(&mut self, peer: ParticipantId) -> Result<(), SessionError> {
        let transport = self
            .factory
            .create(self.local, peer, true, self.transport_tx.clone())
            .await?;
        // Channel before the offer so the offer's SDP includes it.
        transport.create_channel("messages").await?;

        let conn_id = ConnectionId::new();
        info!(%peer, conn = %conn_id, "opening connection as offerer");
        let mut coordinator = NegotiationCoordinator::new(
            self.local,
            peer,
            &self.room,
            conn_id,
            self.store.clone(),
            transport,
            self.events.clone(),
        );
        if let Err(error) = self.wire(&mut coordinator, peer) {
            coordinator.close().await;
            return Err(error.into());
        }
        if let Err(error) = coordinator.send_offer().await {
            coordinator.close().await;
            return Err(error);
        }
        self.connections.insert(peer, coordinator);
        Ok(())
    }

    /// React to a discovery record. Only a document addressed to this
    /// participant by a peer without an existing connection opens an
    /// answering coordinator; the document watch replay then delivers the
    /// offer itself.
    pub async fn handle_discovery(&mut self, event: WatchEvent) -> Result<(), SessionError> {
        let WatchEvent::Added { id, doc } = event else {
            return Ok(());
        };
        let doc: ConnectionDoc = match serde_json::from_value(doc) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(%id, %error, "malformed connection record ignored");
                return Ok(());
            }
        };
        if doc.to != self.local || doc.from == self.local {
            return Ok(());
        }
        if self.connections.contains_key(&doc.from) {
            debug!(peer = %doc.from, "connection already open, record ignored");
            return Ok(());
        }
        self.open_answering(doc.from, ConnectionId::from(id.as_str()))
            .await
    }

    async fn open_answering(
        &mut self,
        peer: ParticipantId,
        conn_id: ConnectionId,
    ) -> Result<(), SessionError> {
        let transport = self
            .factory
            .create(self.local, peer, false, self.transport_tx.clone())
            .await?;
        info!(%peer, conn = %conn_id, "opening connection as answerer");
        let mut coordinator = NegotiationCoordinator::new(
            self.local,
            peer,
            &self.room,
            conn_id,
            self.store.clone(),
            transport,
            self.events.clone(),
        );
        if let Err(error) = self.wire(&mut coordinator, peer) {
            coordinator.close().await;
            return Err(error.into());
        }
        self.connections.insert(peer, coordinator);
        Ok(())
    }

    fn wire(
        &self,
        coordinator: &mut NegotiationCoordinator,
        peer: ParticipantId,
    ) -> Result<(), StoreError> {
        let tx = self.signal_tx.clone();
        coordinator.watch_doc(move |event| {
            let _ = tx.send(SignalNotice::ConnectionDoc { peer, event });
        })?;
        let tx = self.signal_tx.clone();
        coordinator.watch_candidates(move |event| {
            let _ = tx.send(SignalNotice::Candidate { peer, event });
        })?;
        Ok(())
    }

    /// Close and drop the coordinator for `peer`, if any.
    pub async fn close_peer(&mut self, peer: ParticipantId) {
        if let Some(mut coordinator) = self.connections.remove(&peer) {
            coordinator.close().await;
        }
    }

    pub async fn close_all(&mut self) {
        for (_, mut coordinator) in self.connections.drain() {
            coordinator.close().await;
        }
    }

    /// Send a payload to every open message channel. Per-peer failures
    /// are logged and skipped.
    pub async fn broadcast(&mut self, data: Bytes) {
        for coordinator in self.connections.values() {
            if let Err(error) = coordinator.send(data.clone()).await {
                warn!(peer = %coordinator.peer(), %error, "message send failed");
            }
        }
    }

    /// Attach a track on every connection; each renegotiates on its own.
    pub async fn add_track_everywhere(&mut self, track: MediaTrack) -> Result<(), SessionError> {
        for coordinator in self.connections.values_mut() {
            coordinator.add_track(track.clone()).await?;
        }
        Ok(())
    }
}
