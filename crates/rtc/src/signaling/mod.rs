//! Signaling protocol and relay transport
//!
//! Connection-setup metadata (offers, answers, ICE candidates) and
//! media availability announcements travel out-of-band through a relay
//! server that forwards opaque envelopes by target peer id.

pub mod protocol;
pub mod relay;

pub use protocol::{
    ConnectionType, IceCandidate, SdpKind, SessionDescription, SignalEnvelope, SignalMessage,
    BROADCAST_TARGET,
};
pub use relay::{SignalingRelay, WsRelay};
