use std::fmt;
use tether_core::ParticipantId;

/// Per-connection negotiation state.
///
/// One offer/answer round is in flight at a time; a second local change
/// during a round is queued and serviced once the round settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No description exchanged yet.
    Idle,
    /// Building and publishing a local offer.
    Offering,
    /// Offer published, waiting for the remote answer.
    OfferSent,
    /// Applying a remote offer and building the answer.
    Answering,
    /// Answer published, waiting for the transport to settle.
    AnswerPending,
    /// Descriptions settled; the connection is usable.
    Connected,
    /// A renegotiation round is starting.
    Renegotiating,
    /// Torn down; terminal.
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::Answering => "answering",
            NegotiationState::AnswerPending => "answer-pending",
            NegotiationState::Connected => "connected",
            NegotiationState::Renegotiating => "renegotiating",
            NegotiationState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Deterministic glare rule: when both sides publish an offer for the same
/// connection, the offer authored by the smaller participant id wins. Both
/// sides compute the same winner from ids alone, with no extra round trip.
pub fn offer_wins(author: ParticipantId, other: ParticipantId) -> bool {
    author < other
}
