//! Capture device seam
//!
//! The orchestration layer never talks to capture hardware directly;
//! it asks a [`DeviceProvider`] for local tracks. Platform adapters
//! (browser bridge, native capture) implement the trait, and the
//! [`SyntheticDeviceProvider`] keeps headless agents and tests running
//! without hardware.

use crate::config::CaptureConstraints;
use crate::error::DeviceError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone audio
    Audio,
    /// Camera video
    Video,
}

/// One enumerable capture device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Stable device identifier, persisted in local settings
    pub device_id: String,

    /// Which track kind the device produces
    pub kind: TrackKind,

    /// Human-readable label
    pub label: String,
}

/// Source of local capture tracks.
///
/// `open_track` may trigger a platform permission prompt; failures
/// surface as typed [`DeviceError`]s and must never panic, since the
/// trackers treat an absent local stream as "not ready, retry next
/// tick".
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// List available capture devices
    async fn enumerate(&self) -> std::result::Result<Vec<DeviceInfo>, DeviceError>;

    /// Open a capture track.
    ///
    /// # Arguments
    ///
    /// * `kind` - audio or video
    /// * `device_id` - a specific device, or `None` for the default
    /// * `constraints` - resolution/framerate/sample-rate bounds
    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Arc<TrackLocalStaticSample>, DeviceError>;
}

/// Build a local sample track with the codec capability every peer
/// connection shares (Opus audio, VP8 video).
pub fn new_local_track(
    kind: TrackKind,
    constraints: &CaptureConstraints,
    stream_id: &str,
) -> Arc<TrackLocalStaticSample> {
    let capability = match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: constraints.sample_rate,
            channels: constraints.channels,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_string(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
    };

    let track_id = match kind {
        TrackKind::Audio => format!("audio-{}", uuid::Uuid::new_v4()),
        TrackKind::Video => format!("video-{}", uuid::Uuid::new_v4()),
    };

    Arc::new(TrackLocalStaticSample::new(
        capability,
        track_id,
        stream_id.to_string(),
    ))
}

/// Headless capture provider producing silent/blank tracks.
///
/// Used by tests and server-side agents that participate in the office
/// without real capture hardware.
pub struct SyntheticDeviceProvider {
    provide_audio: bool,
    provide_video: bool,
}

impl SyntheticDeviceProvider {
    /// Provider with one synthetic microphone and one synthetic camera
    pub fn new() -> Self {
        Self {
            provide_audio: true,
            provide_video: true,
        }
    }

    /// Provider with a microphone but no camera; video opens fail with
    /// [`DeviceError::NotFound`], exercising the audio-only fallback.
    pub fn without_video() -> Self {
        Self {
            provide_audio: true,
            provide_video: false,
        }
    }

    /// Provider with no devices at all
    pub fn empty() -> Self {
        Self {
            provide_audio: false,
            provide_video: false,
        }
    }

    fn has_kind(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.provide_audio,
            TrackKind::Video => self.provide_video,
        }
    }

    fn default_device_id(kind: TrackKind) -> &'static str {
        match kind {
            TrackKind::Audio => "synthetic-mic-0",
            TrackKind::Video => "synthetic-cam-0",
        }
    }
}

impl Default for SyntheticDeviceProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceProvider for SyntheticDeviceProvider {
    async fn enumerate(&self) -> std::result::Result<Vec<DeviceInfo>, DeviceError> {
        let mut devices = Vec::new();

        if self.provide_audio {
            devices.push(DeviceInfo {
                device_id: Self::default_device_id(TrackKind::Audio).to_string(),
                kind: TrackKind::Audio,
                label: "Synthetic microphone".to_string(),
            });
        }

        if self.provide_video {
            devices.push(DeviceInfo {
                device_id: Self::default_device_id(TrackKind::Video).to_string(),
                kind: TrackKind::Video,
                label: "Synthetic camera".to_string(),
            });
        }

        Ok(devices)
    }

    async fn open_track(
        &self,
        kind: TrackKind,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Arc<TrackLocalStaticSample>, DeviceError> {
        if !self.has_kind(kind) {
            return Err(DeviceError::NotFound(format!(
                "no synthetic {:?} device",
                kind
            )));
        }

        if let Some(id) = device_id {
            if id != Self::default_device_id(kind) {
                return Err(DeviceError::NotFound(id.to_string()));
            }
        }

        debug!("Opening synthetic {:?} track", kind);

        Ok(new_local_track(
            kind,
            constraints,
            &format!("synthetic-{}", uuid::Uuid::new_v4()),
        ))
    }
}
