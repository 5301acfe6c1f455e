use crate::model::participant::ParticipantId;
use crate::model::signaling::SessionDescription;
use crate::model::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Store key of a connection document, generated by the offering side.
#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of a connection document in the rendezvous store.
///
/// `from` identifies the author of the current offer; renegotiation by the
/// other side overwrites it. At most one offer and one answer are current
/// at a time, and publishing a new offer resets `answer` to null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDoc {
    pub from: ParticipantId,
    pub to: ParticipantId,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub offer_time: Option<Timestamp>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}
