use crate::store::StoreError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("room does not exist")]
    RoomNotFound,
    #[error("session is already attached to a room")]
    AlreadyActive,
    #[error("session is not attached to a room")]
    NotActive,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session loop has terminated")]
    Terminated,
}
