//! Proximity-driven call orchestration for a shared 2D office
//!
//! Players move avatars in a 2D world; when two avatars stay close for
//! a sustained period the hub establishes a peer-to-peer audio/video
//! call between them, fades its volume with distance, and tears it
//! down when they separate. Server-authoritative conversations override
//! distance entirely: partners are connected with video at full volume
//! and isolated from bystanders.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  OfficeHub (polling loop, ~200ms)                        │
//! │  ├─ ProximityDetector (hysteresis state machine)         │
//! │  ├─ ConversationTracker (partner diff + pending queue)   │
//! │  ├─ VolumeRouter (distance/conversation gain)            │
//! │  ├─ PeerManager (idempotent connect/disconnect)          │
//! │  │   └─ PeerConnection per remote peer                   │
//! │  ├─ MediaSessionManager (local capture tracks)           │
//! │  └─ WsRelay (signaling envelopes over WebSocket)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use copresence_rtc::HubConfig;
//!
//! let config = HubConfig {
//!     signaling_url: "ws://localhost:8080".to_string(),
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod conversation;
pub mod error;
pub mod hub;
pub mod media;
pub mod peer;
pub mod proximity;
pub mod signaling;
pub mod volume;

pub use config::{CaptureConstraints, DeviceClass, HubConfig, TurnServerConfig};
pub use conversation::{ConversationTick, ConversationTracker};
pub use error::{DeviceError, Error, Result};
pub use hub::OfficeHub;
pub use media::{
    DeviceInfo, DeviceProvider, LocalTracks, MediaSessionManager, SyntheticDeviceProvider,
    TrackKind,
};
pub use peer::{initiates, ConnectionState, PeerConnection, PeerManager};
pub use proximity::{ProximityDetector, ProximityTick};
pub use signaling::{
    ConnectionType, IceCandidate, SdpKind, SessionDescription, SignalEnvelope, SignalMessage,
    SignalingRelay, WsRelay, BROADCAST_TARGET,
};
pub use volume::VolumeRouter;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
