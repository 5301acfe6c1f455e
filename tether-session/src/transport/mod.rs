mod peer_transport;
mod transport_event;
mod webrtc_transport;

pub use peer_transport::{PeerTransport, TransportError, TransportFactory};
pub use transport_event::{TransportEvent, TransportState};
pub use webrtc_transport::{WebRtcFactory, WebRtcTransport, WebRtcTransportConfig};
