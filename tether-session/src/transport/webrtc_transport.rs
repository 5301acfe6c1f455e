use crate::transport::peer_transport::{PeerTransport, TransportError, TransportFactory};
use crate::transport::transport_event::{TransportEvent, TransportState};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tether_core::{CandidateDoc, MediaTrack, ParticipantId, SdpKind, SessionDescription, TrackKind};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

#[derive(Clone)]
pub struct WebRtcTransportConfig {
    pub ice_servers: Vec<String>,
}

impl Default for WebRtcTransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

impl WebRtcTransportConfig {
    /// No ICE servers; host candidates only. Enough for same-host tests.
    pub fn local() -> Self {
        Self {
            ice_servers: Vec::new(),
        }
    }
}

/// Production [`PeerTransport`] over a real `RTCPeerConnection`.
///
/// Trickle ICE, the message channel, and connectivity changes are all
/// forwarded as [`TransportEvent`]s tagged with the remote participant.
pub struct WebRtcTransport {
    peer: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    events: mpsc::Sender<TransportEvent>,
}

impl WebRtcTransport {
    pub async fn new(
        peer: ParticipantId,
        config: WebRtcTransportConfig,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Sdp(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers,
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| TransportError::Sdp(e.to_string()))?,
        );

        let channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

        // Connectivity changes, including terminal failure.
        let state_tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let tx = state_tx.clone();
            Box::pin(async move {
                debug!(peer = %peer, state = ?s, "peer connection state changed");
                let mapped = match s {
                    RTCPeerConnectionState::New => TransportState::New,
                    RTCPeerConnectionState::Connecting => TransportState::Connecting,
                    RTCPeerConnectionState::Connected => TransportState::Connected,
                    RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
                    RTCPeerConnectionState::Failed => TransportState::Failed,
                    RTCPeerConnectionState::Closed => TransportState::Closed,
                    _ => return,
                };
                let _ = tx.send(TransportEvent::StateChanged(peer, mapped)).await;
            })
        }));

        // Trickle ICE: locally gathered candidates go to the relay.
        let ice_tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let Ok(init) = candidate.to_json() else {
                    warn!(peer = %peer, "failed to serialize local candidate");
                    return;
                };
                let doc = CandidateDoc {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                };
                let _ = tx.send(TransportEvent::CandidateGenerated(peer, doc)).await;
            })
        }));

        // Remote media tracks surface as domain events.
        let track_tx = event_tx.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                let tx = track_tx.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video => {
                            TrackKind::Video
                        }
                        _ => TrackKind::Audio,
                    };
                    info!(peer = %peer, id = %track.id(), ?kind, "remote track added");
                    let _ = tx
                        .send(TransportEvent::TrackAdded(
                            peer,
                            MediaTrack::new(track.id(), kind),
                        ))
                        .await;
                })
            },
        ));

        // The responder side waits for the initiator's channel.
        let dc_tx = event_tx.clone();
        let dc_slot = channel.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = dc_tx.clone();
            let slot = dc_slot.clone();
            Box::pin(async move {
                debug!(peer = %peer, label = %dc.label(), "data channel received");
                wire_channel(peer, &dc, tx);
                *slot.lock().await = Some(dc);
            })
        }));

        Ok(Self {
            peer,
            pc,
            channel,
            events: event_tx,
        })
    }

    fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription, TransportError> {
        let result = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        };
        result.map_err(|e| TransportError::Sdp(e.to_string()))
    }
}

fn wire_channel(peer: ParticipantId, dc: &Arc<RTCDataChannel>, tx: mpsc::Sender<TransportEvent>) {
    let open_tx = tx.clone();
    dc.on_open(Box::new(move || {
        let tx = open_tx.clone();
        Box::pin(async move {
            info!(peer = %peer, "data channel open");
            let _ = tx.send(TransportEvent::ChannelOpen(peer)).await;
        })
    }));

    let msg_tx = tx;
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = msg_tx.clone();
        Box::pin(async move {
            let data = Bytes::from(msg.data.to_vec());
            let _ = tx.send(TransportEvent::Message(peer, data)).await;
        })
    }));
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_local_description(Self::to_rtc(&desc)?)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(Self::to_rtc(&desc)?)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))
    }

    async fn rollback_local_description(&self) -> Result<(), TransportError> {
        // webrtc-rs has no rollback constructor for session descriptions;
        // glare losers on this transport abandon the round instead.
        Err(TransportError::Unsupported("description rollback"))
    }

    async fn add_ice_candidate(&self, candidate: CandidateDoc) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: MediaTrack) -> Result<(), TransportError> {
        let codec = match track.kind {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            codec,
            track.id,
            "tether".to_owned(),
        ));
        let rtp_sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;

        // Drain RTCP so the sender keeps flowing.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });
        Ok(())
    }

    async fn create_channel(&self, label: &str) -> Result<(), TransportError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        wire_channel(self.peer, &dc, self.events.clone());
        *self.channel.lock().await = Some(dc);
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        let dc = self
            .channel
            .lock()
            .await
            .clone()
            .ok_or_else(|| TransportError::Channel("message channel not open".to_owned()))?;
        dc.send(&data)
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))
    }
}

/// Factory wiring one [`WebRtcTransport`] per negotiated connection.
#[derive(Clone, Default)]
pub struct WebRtcFactory {
    config: WebRtcTransportConfig,
}

impl WebRtcFactory {
    pub fn new(config: WebRtcTransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
        _local: ParticipantId,
        peer: ParticipantId,
        _initiator: bool,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = WebRtcTransport::new(peer, self.config.clone(), events).await?;
        Ok(Arc::new(transport))
    }
}
