use bytes::Bytes;
use tether_core::{CandidateDoc, MediaTrack, ParticipantId};

/// Coarse transport connectivity, as reported by the transport backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events emitted by a [`super::PeerTransport`] into the session loop.
///
/// Every variant carries the remote participant the transport is bound
/// to, so one channel can aggregate events from the whole mesh.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A locally gathered candidate, ready to be trickled to the peer.
    CandidateGenerated(ParticipantId, CandidateDoc),
    /// The transport wants a new offer/answer round (media composition
    /// changed underneath it).
    NegotiationNeeded(ParticipantId),
    /// A remote media track became available.
    TrackAdded(ParticipantId, MediaTrack),
    /// The message channel for this connection is open.
    ChannelOpen(ParticipantId),
    /// Payload received on the message channel.
    Message(ParticipantId, Bytes),
    /// Connectivity change, including terminal failure.
    StateChanged(ParticipantId, TransportState),
}

impl TransportEvent {
    /// The remote participant this event belongs to.
    pub fn peer(&self) -> ParticipantId {
        match self {
            TransportEvent::CandidateGenerated(peer, _)
            | TransportEvent::NegotiationNeeded(peer)
            | TransportEvent::TrackAdded(peer, _)
            | TransportEvent::ChannelOpen(peer)
            | TransportEvent::Message(peer, _)
            | TransportEvent::StateChanged(peer, _) => *peer,
        }
    }
}
