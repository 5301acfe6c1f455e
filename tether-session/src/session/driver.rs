use crate::mesh::{MeshCoordinator, SignalNotice};
use crate::session::command::SessionCommand;
use crate::session::error::SessionError;
use crate::store::{
    DeleteBatch, FieldWrite, Fields, SignalingStore, StoreError, WatchEvent, value_field,
};
use crate::transport::TransportEvent;
use serde_json::Value;
use std::sync::Arc;
use tether_core::{ConnectionDoc, ConnectionId, ParticipantId, RoomDoc, RoomId, Timestamp, paths};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The session event loop.
///
/// Every input lands here: handle commands, store watch notifications and
/// transport callbacks. Processing them on one task keeps each
/// connection's negotiation strictly ordered without locking.
pub(crate) struct SessionDriver {
    room: RoomId,
    store: Arc<dyn SignalingStore>,
    mesh: MeshCoordinator,
    active: bool,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    signal_rx: mpsc::UnboundedReceiver<SignalNotice>,
    transport_rx: mpsc::Receiver<TransportEvent>,
}

impl SessionDriver {
    pub(crate) fn new(
        room: RoomId,
        store: Arc<dyn SignalingStore>,
        mesh: MeshCoordinator,
        cmd_rx: mpsc::Receiver<SessionCommand>,
        signal_rx: mpsc::UnboundedReceiver<SignalNotice>,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            room,
            store,
            mesh,
            active: false,
            cmd_rx,
            signal_rx,
            transport_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(room = %self.room, local = %self.mesh.local(), "session loop started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        // All handles dropped; tear down and stop.
                        None => break,
                    }
                }
                Some(notice) = self.signal_rx.recv() => {
                    self.handle_signal(notice).await;
                }
                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport(event).await;
                }
            }
        }
        if self.active {
            if let Err(error) = self.hang_up().await {
                warn!(room = %self.room, %error, "teardown on shutdown failed");
            }
        }
        info!(room = %self.room, "session loop finished");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::CreateRoom { reply } => {
                let _ = reply.send(self.create_room().await);
            }
            SessionCommand::JoinRoom { reply } => {
                let _ = reply.send(self.join_room().await);
            }
            SessionCommand::HangUp { reply } => {
                let _ = reply.send(self.hang_up().await);
            }
            SessionCommand::SendMessage { data, reply } => {
                let result = if self.active {
                    self.mesh.broadcast(data).await;
                    Ok(())
                } else {
                    Err(SessionError::NotActive)
                };
                let _ = reply.send(result);
            }
            SessionCommand::AddTrack { track, reply } => {
                let result = if self.active {
                    self.mesh.add_track_everywhere(track).await
                } else {
                    Err(SessionError::NotActive)
                };
                let _ = reply.send(result);
            }
            SessionCommand::LocalId { reply } => {
                let _ = reply.send(self.mesh.local());
            }
        }
    }

    /// Create the room document with this participant as sole member.
    async fn create_room(&mut self) -> Result<RoomId, SessionError> {
        if self.active {
            return Err(SessionError::AlreadyActive);
        }
        let mut fields = Fields::new();
        fields.insert(
            "participants".to_owned(),
            value_field(vec![self.mesh.local()]),
        );
        fields.insert("created".to_owned(), value_field(Timestamp::now()));
        self.store
            .set_merge(&paths::room_doc(&self.room), fields)
            .await?;
        self.mesh.start_discovery()?;
        self.active = true;
        info!(room = %self.room, local = %self.mesh.local(), "room created");
        Ok(self.room.clone())
    }

    /// Join an existing room: offer to every present participant, then
    /// publish membership, then start answering newcomers.
    async fn join_room(&mut self) -> Result<(), SessionError> {
        if self.active {
            return Err(SessionError::AlreadyActive);
        }
        let room_path = paths::room_doc(&self.room);
        let value = self
            .store
            .get(&room_path)
            .await?
            .ok_or(SessionError::RoomNotFound)?;
        let doc: RoomDoc = serde_json::from_value(value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        while doc.participants.contains(&self.mesh.local()) {
            warn!(room = %self.room, "identity collision, regenerating");
            self.mesh.regenerate_local();
        }

        let mut opened = Vec::new();
        for peer in &doc.participants {
            if let Err(error) = self.mesh.open_offering(*peer).await {
                self.abandon_join(&opened).await;
                return Err(error);
            }
            opened.push(*peer);
        }

        let mut fields = Fields::new();
        fields.insert(
            "participants".to_owned(),
            FieldWrite::ArrayUnion(vec![json(self.mesh.local())]),
        );
        if let Err(error) = self.store.update(&room_path, fields).await {
            self.abandon_join(&opened).await;
            return Err(error.into());
        }

        if let Err(error) = self.mesh.start_discovery() {
            self.abandon_join(&opened).await;
            return Err(error.into());
        }
        self.active = true;
        info!(room = %self.room, local = %self.mesh.local(), peers = doc.participants.len(), "room joined");
        Ok(())
    }

    /// Undo a partial join: close every connection already opened and
    /// erase the documents it published, so a failed join leaves the
    /// store and the mesh exactly as they were.
    async fn abandon_join(&mut self, opened: &[ParticipantId]) {
        for peer in opened {
            let Some(coordinator) = self.mesh.coordinator_mut(*peer) else {
                continue;
            };
            let conn = coordinator.conn_id().clone();
            self.mesh.close_peer(*peer).await;

            let mut batch = DeleteBatch::new();
            for origin in [self.mesh.local(), *peer] {
                let coll = paths::candidates(&self.room, &conn, &origin);
                if let Ok(records) = self.store.list(&coll).await {
                    for (record_id, _) in records {
                        batch.delete(format!("{coll}/{record_id}"));
                    }
                }
            }
            batch.delete(paths::connection_doc(&self.room, &conn));
            if let Err(error) = self.store.commit(batch).await {
                warn!(%peer, conn = %conn, %error, "abandoned connection left in the store");
            }
        }
    }

    /// Leave the room and erase this participant's connections.
    ///
    /// Watches are released first so none of the deletions echo back into
    /// the loop. Each connection disappears in one atomic batch together
    /// with its candidate records. Calling this when not attached is a
    /// no-op.
    async fn hang_up(&mut self) -> Result<(), SessionError> {
        if !self.active {
            return Ok(());
        }
        self.mesh.stop_discovery();
        self.mesh.close_all().await;

        let local = self.mesh.local();
        let conn_coll = paths::connections(&self.room);
        for (id, value) in self.store.list(&conn_coll).await? {
            let doc: ConnectionDoc = match serde_json::from_value(value) {
                Ok(doc) => doc,
                Err(_) => continue,
            };
            if doc.from != local && doc.to != local {
                continue;
            }
            let conn = ConnectionId::from(id.as_str());
            let mut batch = DeleteBatch::new();
            for origin in [doc.from, doc.to] {
                let coll = paths::candidates(&self.room, &conn, &origin);
                for (record_id, _) in self.store.list(&coll).await? {
                    batch.delete(format!("{coll}/{record_id}"));
                }
            }
            batch.delete(paths::connection_doc(&self.room, &conn));
            debug!(conn = %conn, docs = batch.len(), "deleting connection");
            self.store.commit(batch).await?;
        }

        let room_path = paths::room_doc(&self.room);
        if let Some(value) = self.store.get(&room_path).await? {
            match serde_json::from_value::<RoomDoc>(value) {
                Ok(doc) if doc.participants.len() <= 2 => {
                    self.store.delete(&room_path).await?;
                }
                Ok(_) => {
                    let mut fields = Fields::new();
                    fields.insert(
                        "participants".to_owned(),
                        FieldWrite::ArrayRemove(vec![json(local)]),
                    );
                    self.store.update(&room_path, fields).await?;
                }
                Err(error) => {
                    warn!(room = %self.room, %error, "unreadable room document left in place");
                }
            }
        }

        self.active = false;
        info!(room = %self.room, local = %local, "left room");
        Ok(())
    }

    async fn handle_signal(&mut self, notice: SignalNotice) {
        match notice {
            SignalNotice::Discovery(event) => {
                if let Err(error) = self.mesh.handle_discovery(event).await {
                    warn!(%error, "failed to open answering connection");
                }
            }
            SignalNotice::ConnectionDoc { peer, event } => match event {
                WatchEvent::Added { doc, .. } | WatchEvent::Modified { doc, .. } => {
                    let Some(coordinator) = self.mesh.coordinator_mut(peer) else {
                        debug!(%peer, "document event for released connection dropped");
                        return;
                    };
                    if let Err(error) = coordinator.handle_doc(doc).await {
                        warn!(%peer, %error, "negotiation step failed");
                    }
                }
                WatchEvent::Removed { .. } => {
                    info!(%peer, "connection document removed, closing");
                    self.mesh.close_peer(peer).await;
                }
            },
            SignalNotice::Candidate { peer, event } => {
                let Some(coordinator) = self.mesh.coordinator_mut(peer) else {
                    debug!(%peer, "candidate event for released connection dropped");
                    return;
                };
                coordinator.handle_candidate(event).await;
            }
        }
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        let peer = event.peer();
        let Some(coordinator) = self.mesh.coordinator_mut(peer) else {
            debug!(%peer, "transport event for released connection dropped");
            return;
        };
        if let Err(error) = coordinator.handle_transport(event).await {
            warn!(%peer, %error, "transport event handling failed");
        }
    }
}

fn json(value: impl serde::Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
