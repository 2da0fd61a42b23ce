//! Configuration types for the orchestration hub

use serde::{Deserialize, Serialize};

/// Main configuration for the office hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Local transport-level peer ID (auto-generated if None)
    pub peer_id: Option<String>,

    /// Side length of one world tile in pixels
    pub tile_size_px: f32,

    /// Distance in tiles at or below which a peer counts as "in range"
    /// for the proximity detector
    pub connect_range_tiles: f32,

    /// Distance in tiles within which proximity volume is 1.0
    pub full_volume_radius_tiles: f32,

    /// Distance in tiles at which proximity volume reaches 0.0
    pub off_volume_radius_tiles: f32,

    /// Sustained in-range time before a proximity connect fires
    pub connect_threshold_ms: u64,

    /// Sustained out-of-range time before a proximity disconnect fires
    pub disconnect_threshold_ms: u64,

    /// Polling cadence of the proximity/conversation/volume tick
    pub poll_interval_ms: u64,

    /// Time a leg may sit in negotiation before it is torn down and
    /// rebuilt from scratch (covers lost offers and answers)
    pub negotiation_timeout_ms: u64,

    /// Local capture constraints
    pub capture: CaptureConstraints,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Coarse device class used to bound capture bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Desktop-grade device: higher resolution and framerate
    Desktop,
    /// Mobile-grade device: capped resolution and framerate
    Mobile,
}

/// Capture constraints handed to the device provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Video capture width in pixels
    pub width: u32,

    /// Video capture height in pixels
    pub height: u32,

    /// Video capture framerate in fps
    pub framerate: u32,

    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Audio channel count
    pub channels: u16,
}

impl CaptureConstraints {
    /// Constraint preset for a coarse device class.
    ///
    /// Mobile devices get a lower resolution/framerate cap so an office
    /// full of peers does not saturate their uplink.
    pub fn for_class(class: DeviceClass) -> Self {
        match class {
            DeviceClass::Desktop => Self {
                width: 1280,
                height: 720,
                framerate: 30,
                sample_rate: 48_000,
                channels: 1,
            },
            DeviceClass::Mobile => Self {
                width: 640,
                height: 480,
                framerate: 15,
                sample_rate: 48_000,
                channels: 1,
            },
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::for_class(DeviceClass::Desktop)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            peer_id: None,
            tile_size_px: 32.0,
            connect_range_tiles: 20.0,
            full_volume_radius_tiles: 5.0,
            off_volume_radius_tiles: 20.0,
            connect_threshold_ms: 750,
            disconnect_threshold_ms: 750,
            poll_interval_ms: 200,
            negotiation_timeout_ms: 10_000,
            capture: CaptureConstraints::default(),
        }
    }
}

impl HubConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `signaling_url` is not a WebSocket URL
    /// - `tile_size_px` is not positive
    /// - the volume radii are not ordered `0 < full < off`
    /// - a hysteresis threshold, the poll interval or the negotiation
    ///   timeout is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.tile_size_px <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "tile_size_px must be positive, got {}",
                self.tile_size_px
            )));
        }

        if self.full_volume_radius_tiles <= 0.0
            || self.off_volume_radius_tiles <= self.full_volume_radius_tiles
        {
            return Err(Error::InvalidConfig(format!(
                "volume radii must satisfy 0 < full < off, got full={} off={}",
                self.full_volume_radius_tiles, self.off_volume_radius_tiles
            )));
        }

        if self.connect_range_tiles <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "connect_range_tiles must be positive, got {}",
                self.connect_range_tiles
            )));
        }

        if self.connect_threshold_ms == 0 || self.disconnect_threshold_ms == 0 {
            return Err(Error::InvalidConfig(
                "hysteresis thresholds must be non-zero".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "poll_interval_ms must be non-zero".to_string(),
            ));
        }

        if self.negotiation_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "negotiation_timeout_ms must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
