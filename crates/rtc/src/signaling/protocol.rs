//! Relay signaling protocol types
//!
//! Messages are exchanged peer-to-peer through a relay server that
//! forwards each envelope by its target peer id. The relay never
//! inspects payloads, so everything here is a plain JSON shape.

use copresence_core::PeerId;
use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Target peer id meaning "every connected peer"
pub const BROADCAST_TARGET: &str = "*";

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Session description offer
    Offer,
    /// Session description answer
    Answer,
}

/// A serialized SDP session description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// The SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Convert to the webrtc crate's native session description
    pub fn to_rtc(&self) -> crate::Result<RTCSessionDescription> {
        let desc = match self.kind {
            SdpKind::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        desc.map_err(|e| crate::Error::SdpError(format!("Failed to parse description: {}", e)))
    }

    /// Wrap a native session description for the wire
    pub fn from_rtc(kind: SdpKind, desc: &RTCSessionDescription) -> Self {
        Self {
            kind,
            sdp: desc.sdp.clone(),
        }
    }

    /// Whether the media description negotiates a video track.
    ///
    /// Used by the offer handler to build a symmetric local connection
    /// (same media kinds) and avoid negotiation mismatches.
    pub fn includes_video(&self) -> bool {
        self.sdp.lines().any(|line| line.starts_with("m=video"))
    }
}

/// One ICE candidate on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate attribute string
    pub candidate: String,

    /// SDP media stream identification tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// SDP media description index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// Media kinds a peer announced it can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Microphone only
    Audio,
    /// Microphone and camera
    Video,
}

/// Signaling message exchanged through the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Announces local media became available
    #[serde(rename_all = "camelCase")]
    EnableVideo {
        /// Which media kinds the sender can now provide
        connection_type: ConnectionType,
    },

    /// Announces local media was released
    DisableVideo {},

    /// Session description offer
    #[serde(rename_all = "camelCase")]
    Offer {
        /// Target peer
        to_peer_id: PeerId,
        /// The offer
        offer: SessionDescription,
    },

    /// Session description answer
    #[serde(rename_all = "camelCase")]
    Answer {
        /// Target peer
        to_peer_id: PeerId,
        /// The answer
        answer: SessionDescription,
    },

    /// One ICE candidate
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// Target peer
        to_peer_id: PeerId,
        /// The candidate
        candidate: IceCandidate,
    },

    /// Remote participant disconnected from the relay
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        /// The departed peer
        peer_id: PeerId,
    },
}

impl SignalMessage {
    /// Target peer id for directed messages, `None` for announcements
    pub fn target(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer { to_peer_id, .. }
            | SignalMessage::Answer { to_peer_id, .. }
            | SignalMessage::IceCandidate { to_peer_id, .. } => Some(to_peer_id),
            _ => None,
        }
    }
}

/// Wire frame: a message plus routing metadata.
///
/// The relay fills `from` with the sender's transport identity and
/// forwards by `to`; `to = "*"` broadcasts to every connected peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Sender transport-level peer id
    pub from: PeerId,

    /// Target transport-level peer id, or [`BROADCAST_TARGET`]
    pub to: PeerId,

    /// The payload
    pub message: SignalMessage,
}

impl SignalEnvelope {
    /// Serialize the envelope to its wire JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize envelope: {}", e))
        })
    }

    /// Parse an envelope from wire JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize envelope: {}", e))
        })
    }
}
