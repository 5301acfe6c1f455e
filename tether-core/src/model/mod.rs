mod candidate;
mod connection;
mod participant;
mod room;
mod signaling;
mod time;
mod track;

pub use candidate::CandidateDoc;
pub use connection::{ConnectionDoc, ConnectionId};
pub use participant::ParticipantId;
pub use room::{RoomDoc, RoomId};
pub use signaling::{SdpKind, SessionDescription};
pub use time::Timestamp;
pub use track::{MediaTrack, TrackKind};
