use serde::{Deserialize, Serialize};

/// Serialized transport candidate, opaque to the signaling core.
///
/// Field names follow the `RTCIceCandidateInit` wire shape so records
/// written by one transport implementation can be consumed by another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDoc {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}
