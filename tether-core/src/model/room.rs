use crate::model::participant::ParticipantId;
use crate::model::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store key of a room document.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of the room document in the rendezvous store.
///
/// The participant list must never contain duplicate identities; joiners
/// append themselves with an atomic array-union, never a full overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDoc {
    pub participants: Vec<ParticipantId>,
    pub created: Timestamp,
}
