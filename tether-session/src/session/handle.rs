use crate::mesh::MeshCoordinator;
use crate::session::command::SessionCommand;
use crate::session::driver::SessionDriver;
use crate::session::error::SessionError;
use crate::session::event::SessionEvent;
use crate::store::SignalingStore;
use crate::transport::TransportFactory;
use bytes::Bytes;
use std::sync::Arc;
use tether_core::{MediaTrack, ParticipantId, RoomId};
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle to a running session loop.
///
/// One session binds one local participant to one room. Dropping every
/// handle stops the loop; if the session is still attached it leaves the
/// room first.
#[derive(Clone)]
pub struct Session {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl Session {
    /// Spawn a session loop with a fresh participant identity.
    pub fn spawn(
        room: RoomId,
        store: Arc<dyn SignalingStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::spawn_with_id(ParticipantId::new(), room, store, factory)
    }

    /// Spawn a session loop with an explicit participant identity.
    pub fn spawn_with_id(
        local: ParticipantId,
        room: RoomId,
        store: Arc<dyn SignalingStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::channel(256);

        let mesh = MeshCoordinator::new(
            local,
            room.clone(),
            store.clone(),
            factory,
            signal_tx,
            transport_tx,
            event_tx,
        );
        let driver = SessionDriver::new(room, store, mesh, cmd_rx, signal_rx, transport_rx);
        tokio::spawn(driver.run());

        (Self { cmd_tx }, event_rx)
    }

    /// Create the room with this participant as its sole member and start
    /// listening for joiners.
    pub async fn create_room(&self) -> Result<RoomId, SessionError> {
        self.request(|reply| SessionCommand::CreateRoom { reply })
            .await?
    }

    /// Join the room: offer to everyone already present, then publish
    /// membership.
    pub async fn join_room(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::JoinRoom { reply })
            .await?
    }

    /// Leave the room and erase this participant's connections from the
    /// store. Idempotent.
    pub async fn hang_up(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::HangUp { reply })
            .await?
    }

    /// Broadcast a payload over every open message channel.
    pub async fn send_message(&self, data: Bytes) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SendMessage { data, reply })
            .await?
    }

    /// Attach a local media track to every connection; each one
    /// renegotiates to carry it.
    pub async fn add_track(&self, track: MediaTrack) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::AddTrack { track, reply })
            .await?
    }

    /// The session's current participant identity. May differ from the
    /// spawn-time identity after a join-time collision.
    pub async fn participant_id(&self) -> Result<ParticipantId, SessionError> {
        self.request(|reply| SessionCommand::LocalId { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| SessionError::Terminated)?;
        rx.await.map_err(|_| SessionError::Terminated)
    }
}
