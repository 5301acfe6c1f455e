use crate::transport::transport_event::TransportEvent;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tether_core::{CandidateDoc, MediaTrack, ParticipantId, SessionDescription};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("sdp error: {0}")]
    Sdp(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("transport closed")]
    Closed,
}

/// Capability contract over one peer-to-peer transport connection.
///
/// The negotiation layer drives this interface and never sees the
/// transport's internals; candidate application failures are expected
/// under trickling and must be non-fatal for the caller.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Discard an in-flight local offer (glare losers call this before
    /// adopting the winning remote offer).
    async fn rollback_local_description(&self) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: CandidateDoc) -> Result<(), TransportError>;

    /// Attach a local media track; takes effect at the next negotiation
    /// round.
    async fn add_track(&self, track: MediaTrack) -> Result<(), TransportError>;

    /// Create the connection's message channel (initiator side only).
    async fn create_channel(&self, label: &str) -> Result<(), TransportError>;

    /// Send a payload over the message channel.
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates one transport per negotiated connection.
///
/// `events` receives every [`TransportEvent`] the new transport emits,
/// tagged with `peer`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        local: ParticipantId,
        peer: ParticipantId,
        initiator: bool,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
