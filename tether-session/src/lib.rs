//! Signaling and negotiation engine for rendezvous-store peer meshes.
//!
//! A [`session::Session`] turns asynchronous, possibly racing writes to a
//! shared observable store into an ordered offer/answer/candidate exchange
//! for every pair of participants in a room. The store and the transport
//! are injected capabilities ([`store::SignalingStore`],
//! [`transport::PeerTransport`]), so the whole protocol can be driven by
//! deterministic test doubles.

pub mod mesh;
pub mod negotiation;
pub mod relay;
pub mod session;
pub mod store;
pub mod transport;

pub use negotiation::NegotiationState;
pub use session::{Session, SessionError, SessionEvent};
pub use store::{
    DeleteBatch, FieldWrite, Fields, MemoryStore, SignalingStore, StoreError, WatchCallback,
    WatchEvent, WatchHandle,
};
pub use transport::{
    PeerTransport, TransportError, TransportEvent, TransportFactory, TransportState,
    WebRtcFactory, WebRtcTransport, WebRtcTransportConfig,
};
