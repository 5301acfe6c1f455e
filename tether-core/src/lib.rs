pub mod model;
pub mod paths;

pub use model::{
    CandidateDoc, ConnectionDoc, ConnectionId, MediaTrack, ParticipantId, RoomDoc, RoomId,
    SdpKind, SessionDescription, Timestamp, TrackKind,
};
