use crate::session::error::SessionError;
use bytes::Bytes;
use tether_core::{MediaTrack, ParticipantId, RoomId};
use tokio::sync::oneshot;

/// Requests sent from a [`super::Session`] handle into the session loop.
#[derive(Debug)]
pub enum SessionCommand {
    CreateRoom {
        reply: oneshot::Sender<Result<RoomId, SessionError>>,
    },
    JoinRoom {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    HangUp {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SendMessage {
        data: Bytes,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    AddTrack {
        track: MediaTrack,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    LocalId {
        reply: oneshot::Sender<ParticipantId>,
    },
}
