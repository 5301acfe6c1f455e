use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, locally generated participant identity.
///
/// The derived `Ord` is the stable attribute used to break offer glare:
/// of two racing offerers, the one with the smaller id wins the round.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Fresh identity for collision recovery at join time.
    pub fn regenerate(&mut self) {
        self.0 = Uuid::new_v4();
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
