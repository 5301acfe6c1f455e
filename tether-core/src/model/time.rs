use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
///
/// Offer times from the same originator must be strictly increasing even
/// when two offers fall inside the same millisecond, hence
/// [`Timestamp::monotonic_after`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self(millis)
    }

    /// Current time, bumped past `prev` if the clock has not advanced.
    pub fn monotonic_after(prev: Option<Timestamp>) -> Self {
        let now = Self::now();
        match prev {
            Some(p) if now.0 <= p.0 => Self(p.0 + 1),
            _ => now,
        }
    }
}
