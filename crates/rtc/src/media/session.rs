//! Local media session management
//!
//! Owns the local capture tracks shared read-only by every peer
//! connection. Switching devices is the only mutating operation: the
//! replacement track is swapped into every live connection's sender
//! before the old track is released.

use super::devices::{DeviceInfo, DeviceProvider, TrackKind};
use crate::config::CaptureConstraints;
use crate::error::DeviceError;
use crate::signaling::ConnectionType;
use crate::{Error, Result};
use copresence_core::{LocalSettings, PeerId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Snapshot of the currently acquired local tracks
#[derive(Clone, Default)]
pub struct LocalTracks {
    /// Microphone track, if acquired
    pub audio: Option<Arc<TrackLocalStaticSample>>,

    /// Camera track, if acquired
    pub video: Option<Arc<TrackLocalStaticSample>>,
}

impl LocalTracks {
    /// Whether any local track is available
    pub fn is_active(&self) -> bool {
        self.audio.is_some() || self.video.is_some()
    }

    /// The media kinds this session can announce
    pub fn connection_type(&self) -> ConnectionType {
        if self.video.is_some() {
            ConnectionType::Video
        } else {
            ConnectionType::Audio
        }
    }
}

/// Owns the local capture device state.
///
/// All peer connections share the same track instances; the sender
/// registry lets [`set_device_track`](MediaSessionManager::set_device_track)
/// hot-swap a replacement into every outgoing sender without
/// renegotiating any connection.
pub struct MediaSessionManager {
    /// Capture backend
    provider: Arc<dyn DeviceProvider>,

    /// Resolution/framerate bounds for the coarse device class
    constraints: CaptureConstraints,

    /// Persisted user preferences
    settings: LocalSettings,

    /// Acquired microphone track
    audio: Arc<RwLock<Option<Arc<TrackLocalStaticSample>>>>,

    /// Acquired camera track
    video: Arc<RwLock<Option<Arc<TrackLocalStaticSample>>>>,

    /// Whether the microphone track is live (join-muted toggles this)
    audio_enabled: AtomicBool,

    /// Whether the camera track is live
    video_enabled: AtomicBool,

    /// Outgoing senders per peer, for device hot-swap
    senders: Arc<RwLock<HashMap<PeerId, HashMap<TrackKind, Arc<RTCRtpSender>>>>>,
}

impl MediaSessionManager {
    /// Create a media session manager.
    ///
    /// # Arguments
    ///
    /// * `provider` - capture backend
    /// * `constraints` - capture bounds for this device class
    /// * `settings` - persisted device preferences
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        constraints: CaptureConstraints,
        settings: LocalSettings,
    ) -> Self {
        Self {
            provider,
            constraints,
            settings,
            audio: Arc::new(RwLock::new(None)),
            video: Arc::new(RwLock::new(None)),
            audio_enabled: AtomicBool::new(false),
            video_enabled: AtomicBool::new(false),
            senders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Acquire camera and microphone tracks.
    ///
    /// Idempotent: if the session is already active this is a no-op, so
    /// conversation auto-activation never re-prompts the user. A failed
    /// camera falls back to audio-only and a failed microphone to
    /// video-only; only when no track at all can be opened does the
    /// device error propagate.
    pub async fn acquire(&self) -> Result<()> {
        if self.is_active().await {
            return Ok(());
        }

        info!("Acquiring local media");

        let audio_result = self
            .provider
            .open_track(
                TrackKind::Audio,
                self.settings.preferred_microphone.as_deref(),
                &self.constraints,
            )
            .await;

        let audio = match audio_result {
            Ok(track) => Some(track),
            Err(e) => {
                warn!("Microphone unavailable, continuing without audio: {}", e);
                None
            }
        };

        let video = if self.settings.join_camera_off {
            debug!("Camera acquisition skipped (join_camera_off)");
            None
        } else {
            match self
                .provider
                .open_track(
                    TrackKind::Video,
                    self.settings.preferred_camera.as_deref(),
                    &self.constraints,
                )
                .await
            {
                Ok(track) => Some(track),
                Err(e) => {
                    warn!("Camera unavailable, falling back to audio-only: {}", e);
                    None
                }
            }
        };

        if audio.is_none() && video.is_none() {
            return Err(Error::Device(DeviceError::NotFound(
                "no capture device could be opened".to_string(),
            )));
        }

        self.audio_enabled
            .store(audio.is_some() && !self.settings.join_muted, Ordering::SeqCst);
        self.video_enabled.store(video.is_some(), Ordering::SeqCst);

        *self.audio.write().await = audio;
        *self.video.write().await = video;

        info!("Local media acquired");

        Ok(())
    }

    /// List the capture devices the provider can open
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.provider.enumerate().await.map_err(Error::Device)
    }

    /// Snapshot of the currently acquired tracks
    pub async fn local_tracks(&self) -> LocalTracks {
        LocalTracks {
            audio: self.audio.read().await.clone(),
            video: self.video.read().await.clone(),
        }
    }

    /// Whether any local track is acquired
    pub async fn is_active(&self) -> bool {
        self.audio.read().await.is_some() || self.video.read().await.is_some()
    }

    /// Whether the microphone track is live
    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    /// Whether the camera track is live
    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Toggle the microphone track
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Toggle the camera track
    pub fn set_video_enabled(&self, enabled: bool) {
        self.video_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Register an outgoing sender so device switches reach this peer.
    ///
    /// Called by the peer connection manager when it adds a local track
    /// to a new connection.
    pub async fn register_sender(&self, peer_id: &str, kind: TrackKind, sender: Arc<RTCRtpSender>) {
        self.senders
            .write()
            .await
            .entry(peer_id.to_string())
            .or_default()
            .insert(kind, sender);
    }

    /// Drop all sender registrations for a departed peer
    pub async fn unregister_peer(&self, peer_id: &str) {
        self.senders.write().await.remove(peer_id);
    }

    /// Switch to a different capture device.
    ///
    /// Re-acquires a single track and hot-swaps it into every active
    /// connection's outgoing sender; the old track is dropped only after
    /// every sender has been updated, so no connection transmits a
    /// stopped track.
    pub async fn set_device_track(&self, kind: TrackKind, device_id: &str) -> Result<()> {
        info!("Switching {:?} device to {}", kind, device_id);

        let new_track = self
            .provider
            .open_track(kind, Some(device_id), &self.constraints)
            .await
            .map_err(Error::Device)?;

        let slot = match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        };

        // Hold the slot lock across the swap so a concurrent acquire or
        // release cannot interleave with the sender updates.
        let mut slot_guard = slot.write().await;

        let senders = self.senders.read().await;
        for (peer_id, peer_senders) in senders.iter() {
            if let Some(sender) = peer_senders.get(&kind) {
                sender
                    .replace_track(Some(
                        Arc::clone(&new_track) as Arc<dyn TrackLocal + Send + Sync>
                    ))
                    .await
                    .map_err(|e| {
                        Error::MediaTrackError(format!(
                            "Failed to replace {:?} track for peer {}: {}",
                            kind, peer_id, e
                        ))
                    })?;

                debug!("Replaced {:?} track on sender for peer {}", kind, peer_id);
            }
        }

        *slot_guard = Some(new_track);

        Ok(())
    }

    /// Stop all local tracks and clear state
    pub async fn release(&self) {
        info!("Releasing local media");

        *self.audio.write().await = None;
        *self.video.write().await = None;
        self.audio_enabled.store(false, Ordering::SeqCst);
        self.video_enabled.store(false, Ordering::SeqCst);
        self.senders.write().await.clear();
    }
}
