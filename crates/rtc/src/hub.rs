//! Office hub orchestration
//!
//! Glues the trackers to the connection manager. The proximity detector
//! and conversation tracker run on one polling tick and both reconcile
//! against the same idempotent connect/disconnect surface, so neither
//! needs to know about the other's decisions; the volume router runs on
//! the same tick and only touches gain.

use crate::config::HubConfig;
use crate::conversation::ConversationTracker;
use crate::media::{DeviceInfo, DeviceProvider, MediaSessionManager, TrackKind};
use crate::peer::PeerManager;
use crate::proximity::ProximityDetector;
use crate::signaling::{
    ConnectionType, SignalEnvelope, SignalMessage, SignalingRelay, WsRelay,
};
use crate::volume::VolumeRouter;
use crate::Result;
use copresence_core::{LocalSettings, PeerId, PlayerDirectory, PlayerSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Top-level call orchestration for one office session.
///
/// Owns the media session, the peer manager and the trackers, and runs
/// the polling loop that drives them.
pub struct OfficeHub {
    /// Our transport-level identity
    local_peer_id: PeerId,

    /// Polling cadence
    poll_interval: Duration,

    /// Local media session
    media: Arc<MediaSessionManager>,

    /// Active call legs
    peers: Arc<PeerManager>,

    /// Authoritative player positions, read each tick
    directory: Arc<dyn PlayerDirectory>,

    /// Signaling relay, used here for media announcements
    relay: Arc<dyn SignalingRelay>,

    /// Spatial hysteresis state
    proximity: Mutex<ProximityDetector>,

    /// Conversation partner state
    conversations: Mutex<ConversationTracker>,

    /// Gain computation
    volume: VolumeRouter,

    /// Latest per-peer playback gains
    gains: Arc<RwLock<HashMap<PeerId, f32>>>,

    /// Media kinds each remote peer has announced
    announced_media: Arc<RwLock<HashMap<PeerId, ConnectionType>>>,

    /// Whether local media availability has been announced
    media_announced: AtomicBool,

    /// Cleared by shutdown to stop the background tasks
    running: Arc<AtomicBool>,
}

impl OfficeHub {
    /// Connect to the office: dial the signaling relay and start the
    /// orchestration tasks.
    ///
    /// # Arguments
    ///
    /// * `config` - hub configuration
    /// * `directory` - state-sync adapter exposing player positions
    /// * `provider` - capture backend
    /// * `settings` - persisted device preferences
    pub async fn connect(
        config: HubConfig,
        directory: Arc<dyn PlayerDirectory>,
        provider: Arc<dyn DeviceProvider>,
        settings: LocalSettings,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let local_peer_id = config
            .peer_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (relay, envelopes) =
            WsRelay::connect(&config.signaling_url, local_peer_id.clone()).await?;

        Self::start(
            config,
            local_peer_id,
            directory,
            provider,
            settings,
            Arc::new(relay),
            envelopes,
        )
    }

    /// Start the hub over an already-connected relay.
    ///
    /// Split out of [`connect`](Self::connect) so embedders and tests
    /// can supply their own relay transport.
    pub fn start(
        config: HubConfig,
        local_peer_id: PeerId,
        directory: Arc<dyn PlayerDirectory>,
        provider: Arc<dyn DeviceProvider>,
        settings: LocalSettings,
        relay: Arc<dyn SignalingRelay>,
        envelopes: mpsc::UnboundedReceiver<SignalEnvelope>,
    ) -> Result<Arc<Self>> {
        let hub = Self::build(
            config,
            local_peer_id,
            directory,
            provider,
            settings,
            relay,
        )?;

        hub.spawn_tasks(envelopes);

        Ok(hub)
    }

    fn build(
        config: HubConfig,
        local_peer_id: PeerId,
        directory: Arc<dyn PlayerDirectory>,
        provider: Arc<dyn DeviceProvider>,
        settings: LocalSettings,
        relay: Arc<dyn SignalingRelay>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        info!("Starting office hub as peer {}", local_peer_id);

        let media = Arc::new(MediaSessionManager::new(
            provider,
            config.capture.clone(),
            settings,
        ));

        let peers = Arc::new(PeerManager::new(
            local_peer_id.clone(),
            config.clone(),
            Arc::clone(&media),
            Arc::clone(&relay),
        ));

        Ok(Arc::new(Self {
            local_peer_id,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            media,
            peers,
            directory,
            relay,
            proximity: Mutex::new(ProximityDetector::new(&config)),
            conversations: Mutex::new(ConversationTracker::new()),
            volume: VolumeRouter::new(&config),
            gains: Arc::new(RwLock::new(HashMap::new())),
            announced_media: Arc::new(RwLock::new(HashMap::new())),
            media_announced: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(true)),
        }))
    }

    /// Spawn the signaling dispatcher, the terminal-connection reaper
    /// and the polling loop.
    fn spawn_tasks(self: &Arc<Self>, mut envelopes: mpsc::UnboundedReceiver<SignalEnvelope>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(envelope) = envelopes.recv().await {
                if !hub.running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = hub.handle_envelope(envelope).await {
                    // Dropped; the next tick reconciles from scratch
                    warn!("Signaling message dropped: {}", e);
                }
            }

            debug!("Signaling dispatcher terminated");
        });

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut terminals = match hub.peers.take_terminal_events().await {
                Some(rx) => rx,
                None => return,
            };

            while let Some(peer_id) = terminals.recv().await {
                if !hub.running.load(Ordering::SeqCst) {
                    break;
                }

                hub.peers.reap(&peer_id).await;
            }

            debug!("Connection reaper terminated");
        });

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(hub.poll_interval);
            let mut last = Instant::now();

            loop {
                ticker.tick().await;

                if !hub.running.load(Ordering::SeqCst) {
                    break;
                }

                let now = Instant::now();
                hub.tick(now - last).await;
                last = now;
            }

            debug!("Polling loop terminated");
        });
    }

    /// One polling tick: reconcile conversations, proximity and volume
    /// against the current player snapshots.
    async fn tick(&self, elapsed: Duration) {
        let local = match self.directory.local_player() {
            Some(local) => local,
            None => return,
        };

        let remotes = self.directory.remote_players();

        // A conversation requires local media; keep trying each tick
        // until the devices come up.
        let was_ready = self.media.is_active().await;
        if local.in_conversation() && !was_ready {
            match self.media.acquire().await {
                Ok(()) => self.announce_media().await,
                Err(e) => warn!("Media acquisition failed, retrying next tick: {}", e),
            }
        }

        let media_ready = self.media.is_active().await;

        let (conv, flushed) = {
            let mut conversations = self.conversations.lock().await;
            let conv = conversations.tick(&local, &remotes, media_ready);

            // Media just became available: release the queued partners
            let flushed = if media_ready && !was_ready {
                conversations.flush_pending()
            } else {
                Vec::new()
            };

            (conv, flushed)
        };

        let prox = {
            let mut proximity = self.proximity.lock().await;
            proximity.tick(&local, &remotes, elapsed)
        };

        // Tracker events connect eagerly; the sweep below retries
        // whatever these calls could not finish.
        for peer_id in conv.connect.iter().chain(flushed.iter()) {
            self.ensure_connected(peer_id, ConnectionType::Video).await;
        }

        for peer_id in &prox.connect {
            let wanted = self.proximity_connection_type(peer_id).await;
            self.ensure_connected(peer_id, wanted).await;
        }

        self.reconcile_connections(&remotes).await;

        // Disconnect events from one tracker are vetoed by the other
        for peer_id in &conv.disconnect {
            if !self.proximity.lock().await.is_engaged(peer_id) {
                if let Err(e) = self.peers.disconnect(peer_id).await {
                    warn!("Failed to disconnect peer {}: {}", peer_id, e);
                }
            }
        }

        for peer_id in &prox.disconnect {
            if !self.conversations.lock().await.is_partner(peer_id) {
                if let Err(e) = self.peers.disconnect(peer_id).await {
                    warn!("Failed to disconnect peer {}: {}", peer_id, e);
                }
            }
        }

        *self.gains.write().await = self.volume.gains(&local, &remotes);
    }

    /// Drive every peer either tracker wants towards a live entry with
    /// the right media kinds. Runs every tick: connect and renegotiate
    /// are idempotent, and re-issuing them is what retries connections
    /// that failed or that were skipped while media was unavailable.
    async fn reconcile_connections(&self, remotes: &[PlayerSnapshot]) {
        let partners = self.conversations.lock().await.partners();
        let engaged = self.proximity.lock().await.engaged_peers();

        // Only reconcile peers still present in the world
        let present = |id: &PeerId| remotes.iter().any(|r| &r.peer_id == id);

        for peer_id in partners.iter().filter(|id| present(id)) {
            self.ensure_connected(peer_id, ConnectionType::Video).await;
        }

        for peer_id in engaged.iter().filter(|id| present(id)) {
            if partners.contains(peer_id) {
                continue;
            }

            let wanted = self.proximity_connection_type(peer_id).await;
            self.ensure_connected(peer_id, wanted).await;
        }
    }

    /// Media kinds for a proximity-sourced call: video only when both
    /// sides can provide it, otherwise audio.
    async fn proximity_connection_type(&self, peer_id: &str) -> ConnectionType {
        let remote_video = matches!(
            self.announced_media.read().await.get(peer_id),
            Some(ConnectionType::Video)
        );

        if remote_video && self.media.local_tracks().await.video.is_some() {
            ConnectionType::Video
        } else {
            ConnectionType::Audio
        }
    }

    async fn ensure_connected(&self, peer_id: &str, connection_type: ConnectionType) {
        let result = match self.peers.entry_connection_type(peer_id).await {
            Some(existing) if existing != connection_type => {
                self.peers.renegotiate(peer_id, connection_type).await
            }
            // connect is a no-op on a live entry and rebuilds one that
            // stalled past the negotiation timeout
            _ => self.peers.connect(peer_id, connection_type).await,
        };

        if let Err(e) = result {
            warn!("Connection attempt to peer {} failed: {}", peer_id, e);
        }
    }

    /// Dispatch one signaling envelope
    async fn handle_envelope(&self, envelope: SignalEnvelope) -> Result<()> {
        let from = envelope.from;

        match envelope.message {
            SignalMessage::Offer { offer, .. } => self.peers.handle_offer(&from, &offer).await,
            SignalMessage::Answer { answer, .. } => self.peers.handle_answer(&from, &answer).await,
            SignalMessage::IceCandidate { candidate, .. } => {
                self.peers.handle_ice_candidate(&from, candidate).await
            }
            SignalMessage::PeerLeft { peer_id } => {
                info!("Peer {} left the office", peer_id);
                self.announced_media.write().await.remove(&peer_id);
                self.peers.disconnect(&peer_id).await
            }
            SignalMessage::EnableVideo { connection_type } => {
                debug!("Peer {} announced {:?} media", from, connection_type);
                self.announced_media
                    .write()
                    .await
                    .insert(from.clone(), connection_type);

                // An existing audio leg upgrades on the next reconcile;
                // nothing to do eagerly.
                Ok(())
            }
            SignalMessage::DisableVideo {} => {
                debug!("Peer {} released their media", from);
                self.announced_media.write().await.remove(&from);
                Ok(())
            }
        }
    }

    /// Broadcast local media availability
    async fn announce_media(&self) {
        let tracks = self.media.local_tracks().await;
        if !tracks.is_active() {
            return;
        }

        let message = SignalMessage::EnableVideo {
            connection_type: tracks.connection_type(),
        };

        if let Err(e) = self.relay.broadcast(message) {
            warn!("Failed to announce local media: {}", e);
        } else {
            self.media_announced.store(true, Ordering::SeqCst);
        }
    }

    /// Our transport-level peer id
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Acquire local media explicitly (outside conversation
    /// auto-activation) and announce it.
    pub async fn acquire_media(&self) -> Result<()> {
        self.media.acquire().await?;
        self.announce_media().await;
        Ok(())
    }

    /// List available capture devices
    pub async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.media.enumerate_devices().await
    }

    /// Switch a capture device, hot-swapping it into every live leg
    pub async fn set_device(&self, kind: TrackKind, device_id: &str) -> Result<()> {
        self.media.set_device_track(kind, device_id).await
    }

    /// Toggle the microphone
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.media.set_audio_enabled(enabled);
    }

    /// Toggle the camera
    pub fn set_video_enabled(&self, enabled: bool) {
        self.media.set_video_enabled(enabled);
    }

    /// Latest playback gain per remote peer
    pub async fn gains(&self) -> HashMap<PeerId, f32> {
        self.gains.read().await.clone()
    }

    /// Playback gain for one peer, if known
    pub async fn gain_for(&self, peer_id: &str) -> Option<f32> {
        self.gains.read().await.get(peer_id).copied()
    }

    /// Remote media tracks received from a peer
    pub async fn remote_tracks(&self, peer_id: &str) -> Vec<Arc<TrackRemote>> {
        self.peers.remote_tracks(peer_id).await
    }

    /// Peers with an active call leg
    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.active_peers().await
    }

    /// Stop the hub: announce the media release, close every leg and
    /// release the local devices.
    pub async fn shutdown(&self) {
        info!("Shutting down office hub");

        self.running.store(false, Ordering::SeqCst);

        if self.media_announced.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.relay.broadcast(SignalMessage::DisableVideo {}) {
                warn!("Failed to announce media release: {}", e);
            }
        }

        self.peers.shutdown().await;
        self.media.release().await;
        self.gains.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConstraints;
    use crate::error::DeviceError;
    use crate::media::SyntheticDeviceProvider;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    const TICK: Duration = Duration::from_millis(200);

    /// Directory with scriptable player state
    struct ScriptedDirectory {
        local: StdMutex<Option<PlayerSnapshot>>,
        remotes: StdMutex<Vec<PlayerSnapshot>>,
    }

    impl ScriptedDirectory {
        fn new() -> Self {
            Self {
                local: StdMutex::new(None),
                remotes: StdMutex::new(Vec::new()),
            }
        }

        fn set_local(&self, snapshot: PlayerSnapshot) {
            *self.local.lock().unwrap() = Some(snapshot);
        }

        fn set_remotes(&self, remotes: Vec<PlayerSnapshot>) {
            *self.remotes.lock().unwrap() = remotes;
        }
    }

    impl PlayerDirectory for ScriptedDirectory {
        fn local_player(&self) -> Option<PlayerSnapshot> {
            self.local.lock().unwrap().clone()
        }

        fn remote_players(&self) -> Vec<PlayerSnapshot> {
            self.remotes.lock().unwrap().clone()
        }
    }

    /// In-memory relay capturing sent envelopes
    struct RecordingRelay {
        local: PeerId,
        sent: StdMutex<Vec<SignalEnvelope>>,
    }

    impl RecordingRelay {
        fn new(local: &str) -> Self {
            Self {
                local: local.to_string(),
                sent: StdMutex::new(Vec::new()),
            }
        }

        fn sent_messages(&self) -> Vec<SignalEnvelope> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SignalingRelay for RecordingRelay {
        fn send(&self, to: &str, message: SignalMessage) -> Result<()> {
            self.sent.lock().unwrap().push(SignalEnvelope {
                from: self.local.clone(),
                to: to.to_string(),
                message,
            });
            Ok(())
        }
    }

    /// Provider whose devices only come up once flipped available
    struct FlakyProvider {
        inner: SyntheticDeviceProvider,
        available: AtomicBool,
    }

    impl FlakyProvider {
        fn new() -> Self {
            Self {
                inner: SyntheticDeviceProvider::new(),
                available: AtomicBool::new(false),
            }
        }

        fn make_available(&self) {
            self.available.store(true, Ordering::SeqCst);
        }

        fn check(&self) -> std::result::Result<(), DeviceError> {
            if self.available.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(DeviceError::Busy("devices not up yet".to_string()))
            }
        }
    }

    #[async_trait]
    impl DeviceProvider for FlakyProvider {
        async fn enumerate(&self) -> std::result::Result<Vec<DeviceInfo>, DeviceError> {
            self.check()?;
            self.inner.enumerate().await
        }

        async fn open_track(
            &self,
            kind: TrackKind,
            device_id: Option<&str>,
            constraints: &CaptureConstraints,
        ) -> std::result::Result<Arc<TrackLocalStaticSample>, DeviceError> {
            self.check()?;
            self.inner.open_track(kind, device_id, constraints).await
        }
    }

    /// Hub with no background tasks, ticked manually
    fn test_hub_with(
        local: &str,
        config: HubConfig,
        provider: Arc<dyn DeviceProvider>,
    ) -> (Arc<OfficeHub>, Arc<ScriptedDirectory>, Arc<RecordingRelay>) {
        let directory = Arc::new(ScriptedDirectory::new());
        let relay = Arc::new(RecordingRelay::new(local));

        let hub = OfficeHub::build(
            config,
            local.to_string(),
            Arc::clone(&directory) as Arc<dyn PlayerDirectory>,
            provider,
            LocalSettings::default(),
            Arc::clone(&relay) as Arc<dyn SignalingRelay>,
        )
        .unwrap();

        (hub, directory, relay)
    }

    fn test_hub(local: &str) -> (Arc<OfficeHub>, Arc<ScriptedDirectory>, Arc<RecordingRelay>) {
        test_hub_with(
            local,
            HubConfig::default(),
            Arc::new(SyntheticDeviceProvider::new()),
        )
    }

    fn player(peer_id: &str, tiles: f32, conversation_id: &str) -> PlayerSnapshot {
        let mut p = PlayerSnapshot::new(peer_id, tiles * 32.0, 0.0);
        p.conversation_id = conversation_id.to_string();
        p
    }

    #[tokio::test]
    async fn test_tick_without_local_player_is_noop() {
        let (hub, directory, relay) = test_hub("peer-b");
        directory.set_remotes(vec![player("peer-a", 1.0, "")]);

        hub.tick(TICK).await;

        assert!(hub.connected_peers().await.is_empty());
        assert!(relay.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_acquires_media_and_connects_partner() {
        let (hub, directory, relay) = test_hub("peer-b");

        directory.set_local(player("peer-b", 0.0, "conv-1"));
        directory.set_remotes(vec![player("peer-a", 50.0, "conv-1")]);

        hub.tick(TICK).await;
        hub.tick(TICK).await;

        // Media auto-activated and announced
        let sent = relay.sent_messages();
        assert!(sent
            .iter()
            .any(|e| matches!(e.message, SignalMessage::EnableVideo { .. })));

        // Partner connected with video despite the distance
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));
        assert_eq!(
            hub.peers.entry_connection_type("peer-a").await,
            Some(ConnectionType::Video)
        );
    }

    #[tokio::test]
    async fn test_queued_partner_connects_when_media_comes_up() {
        let provider = Arc::new(FlakyProvider::new());
        let (hub, directory, relay) = test_hub_with(
            "peer-b",
            HubConfig::default(),
            Arc::clone(&provider) as Arc<dyn DeviceProvider>,
        );

        directory.set_local(player("peer-b", 0.0, "conv-1"));
        directory.set_remotes(vec![player("peer-a", 50.0, "conv-1")]);

        // Devices refuse to open; the partner stays queued
        hub.tick(TICK).await;
        hub.tick(TICK).await;
        assert!(hub.connected_peers().await.is_empty());
        assert!(relay.sent_messages().is_empty());

        provider.make_available();
        hub.tick(TICK).await;

        // The flushed partner is connected with video on the same tick
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));
        assert_eq!(
            hub.peers.entry_connection_type("peer-a").await,
            Some(ConnectionType::Video)
        );
    }

    #[tokio::test]
    async fn test_stalled_leg_is_rebuilt_on_later_tick() {
        let mut config = HubConfig::default();
        config.negotiation_timeout_ms = 200;

        let (hub, directory, relay) = test_hub_with(
            "peer-b",
            config,
            Arc::new(SyntheticDeviceProvider::new()),
        );

        hub.acquire_media().await.unwrap();
        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }

        let offers_before = relay
            .sent_messages()
            .iter()
            .filter(|e| matches!(e.message, SignalMessage::Offer { .. }))
            .count();
        assert_eq!(offers_before, 1);

        // The answer never arrives; once the leg stalls the sweep
        // tears it down and sends a fresh offer
        tokio::time::sleep(Duration::from_millis(300)).await;
        hub.tick(TICK).await;

        let offers_after = relay
            .sent_messages()
            .iter()
            .filter(|e| matches!(e.message, SignalMessage::Offer { .. }))
            .count();
        assert_eq!(offers_after, 2);
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));
    }

    #[tokio::test]
    async fn test_proximity_connects_after_hysteresis() {
        let (hub, directory, _relay) = test_hub("peer-b");

        hub.acquire_media().await.unwrap();

        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        // Below the 750ms threshold nothing connects
        for _ in 0..3 {
            hub.tick(TICK).await;
        }
        assert!(hub.connected_peers().await.is_empty());

        // Past the threshold plus the decision tick, the leg exists
        for _ in 0..3 {
            hub.tick(TICK).await;
        }
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));
    }

    #[tokio::test]
    async fn test_non_initiator_waits_for_offer() {
        let (hub, directory, relay) = test_hub("peer-a");

        hub.acquire_media().await.unwrap();

        directory.set_local(player("peer-a", 0.0, ""));
        directory.set_remotes(vec![player("peer-b", 2.0, "")]);

        for _ in 0..8 {
            hub.tick(TICK).await;
        }

        // peer-b is the initiator; we never sent an offer
        assert!(hub.connected_peers().await.is_empty());
        assert!(!relay
            .sent_messages()
            .iter()
            .any(|e| matches!(e.message, SignalMessage::Offer { .. })));
    }

    #[tokio::test]
    async fn test_leaving_range_disconnects_after_hysteresis() {
        let (hub, directory, _relay) = test_hub("peer-b");

        hub.acquire_media().await.unwrap();
        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));

        directory.set_remotes(vec![player("peer-a", 100.0, "")]);
        for _ in 0..6 {
            hub.tick(TICK).await;
        }

        assert!(hub.connected_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_keeps_distant_partner_connected() {
        let (hub, directory, _relay) = test_hub("peer-b");

        directory.set_local(player("peer-b", 0.0, "conv-1"));
        directory.set_remotes(vec![player("peer-a", 2.0, "conv-1")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }

        // Partner walks far away but stays in the conversation
        directory.set_remotes(vec![player("peer-a", 200.0, "conv-1")]);
        for _ in 0..10 {
            hub.tick(TICK).await;
        }

        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));
    }

    #[tokio::test]
    async fn test_gains_follow_conversation_and_distance() {
        let (hub, directory, _relay) = test_hub("peer-b");

        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![
            player("peer-a", 3.0, ""),
            player("peer-c", 1.0, "conv-9"),
        ]);

        hub.tick(TICK).await;

        assert_eq!(hub.gain_for("peer-a").await, Some(1.0));
        // Locked conversation isolates the bystander
        assert_eq!(hub.gain_for("peer-c").await, Some(0.0));
    }

    #[tokio::test]
    async fn test_peer_left_tears_down_entry() {
        let (hub, directory, _relay) = test_hub("peer-b");

        hub.acquire_media().await.unwrap();
        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }
        assert!(hub.connected_peers().await.contains(&"peer-a".to_string()));

        hub.handle_envelope(SignalEnvelope {
            from: "relay".to_string(),
            to: "peer-b".to_string(),
            message: SignalMessage::PeerLeft {
                peer_id: "peer-a".to_string(),
            },
        })
        .await
        .unwrap();

        assert!(hub.connected_peers().await.is_empty());
    }

    #[tokio::test]
    async fn test_video_announcement_upgrades_proximity_leg() {
        let (hub, directory, relay) = test_hub("peer-b");

        hub.acquire_media().await.unwrap();
        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }
        assert_eq!(
            hub.peers.entry_connection_type("peer-a").await,
            Some(ConnectionType::Audio)
        );

        hub.handle_envelope(SignalEnvelope {
            from: "peer-a".to_string(),
            to: "peer-b".to_string(),
            message: SignalMessage::EnableVideo {
                connection_type: ConnectionType::Video,
            },
        })
        .await
        .unwrap();

        hub.tick(TICK).await;

        assert_eq!(
            hub.peers.entry_connection_type("peer-a").await,
            Some(ConnectionType::Video)
        );

        // Restart-based upgrade: a fresh offer went out
        let offers = relay
            .sent_messages()
            .iter()
            .filter(|e| matches!(e.message, SignalMessage::Offer { .. }))
            .count();
        assert_eq!(offers, 2);
    }

    #[tokio::test]
    async fn test_shutdown_announces_and_clears() {
        let (hub, directory, relay) = test_hub("peer-b");

        hub.acquire_media().await.unwrap();
        directory.set_local(player("peer-b", 0.0, ""));
        directory.set_remotes(vec![player("peer-a", 2.0, "")]);

        for _ in 0..6 {
            hub.tick(TICK).await;
        }

        hub.shutdown().await;

        assert!(hub.connected_peers().await.is_empty());
        assert!(hub.gains().await.is_empty());
        assert!(relay
            .sent_messages()
            .iter()
            .any(|e| matches!(e.message, SignalMessage::DisableVideo {})));
    }
}
