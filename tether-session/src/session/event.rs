use crate::negotiation::NegotiationState;
use bytes::Bytes;
use tether_core::{MediaTrack, ParticipantId};

/// Events a [`super::Session`] reports to its owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A connection's negotiation state changed.
    PeerState {
        peer: ParticipantId,
        state: NegotiationState,
    },
    /// A remote media track became available on a connection.
    TrackAdded {
        peer: ParticipantId,
        track: MediaTrack,
    },
    /// The message channel to a peer is open.
    ChannelOpen { peer: ParticipantId },
    /// Payload received from a peer over the message channel.
    MessageReceived { peer: ParticipantId, data: Bytes },
    /// The transport to a peer failed; the session does not retry.
    TransportFailed { peer: ParticipantId },
}
