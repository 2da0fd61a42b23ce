//! WebRTC peer connection wrapper

use crate::config::HubConfig;
use crate::media::TrackKind;
use crate::signaling::{ConnectionType, IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use copresence_core::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, negotiation not yet started
    New,
    /// Negotiation in progress
    Connecting,
    /// Connection established
    Connected,
    /// Connection failed; the entry must be discarded
    Failed,
    /// Connection closed; the entry must be discarded
    Closed,
}

impl ConnectionState {
    /// Terminal states never recover in place. The trackers reconnect
    /// from scratch on a later tick if the peer is still in range.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// One call leg to a remote peer.
///
/// Wraps an RTCPeerConnection with the negotiation bookkeeping the
/// manager needs: remote candidates that arrive before the remote
/// description are queued and flushed in arrival order, and terminal
/// state transitions are reported once through the terminal channel so
/// the manager can discard the entry.
pub struct PeerConnection {
    /// Remote peer this leg talks to
    peer_id: PeerId,

    /// Media kinds this leg was negotiated with
    connection_type: ConnectionType,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// When this leg was created, for the negotiation timeout
    created_at: Instant,

    /// Underlying WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Remote candidates received before the remote description.
    ///
    /// The lock is also held across set_remote_description and the
    /// flush so a candidate arriving mid-flush cannot jump the queue.
    pending_candidates: Arc<Mutex<Vec<IceCandidate>>>,
}

impl PeerConnection {
    /// Create a new peer connection leg.
    ///
    /// # Arguments
    ///
    /// * `peer_id` - remote peer this leg talks to
    /// * `connection_type` - media kinds to negotiate
    /// * `config` - STUN/TURN server configuration
    /// * `terminal_tx` - notified once if the connection reaches a
    ///   terminal state
    pub async fn new(
        peer_id: PeerId,
        connection_type: ConnectionType,
        config: &HubConfig,
        terminal_tx: mpsc::UnboundedSender<PeerId>,
    ) -> Result<Self> {
        info!(
            "Creating peer connection: peer_id={}, type={:?}",
            peer_id, connection_type
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let state = Arc::new(RwLock::new(ConnectionState::New));

        let state_clone = Arc::clone(&state);
        let peer_id_clone = peer_id.clone();
        let terminal_notified = Arc::new(AtomicBool::new(false));

        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state_clone = Arc::clone(&state_clone);
                let peer_id = peer_id_clone.clone();
                let terminal_tx = terminal_tx.clone();
                let terminal_notified = Arc::clone(&terminal_notified);

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                            ConnectionState::Closed
                        }
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        _ => return,
                    };

                    let mut state_guard = state_clone.write().await;
                    let old_state = *state_guard;

                    if old_state != new_state {
                        debug!(
                            "Peer {} state transition: {:?} -> {:?}",
                            peer_id, old_state, new_state
                        );
                        *state_guard = new_state;
                    }

                    drop(state_guard);

                    if new_state.is_terminal() && !terminal_notified.swap(true, Ordering::SeqCst) {
                        // Receiver may already be gone during shutdown.
                        let _ = terminal_tx.send(peer_id);
                    }
                })
            },
        ));

        Ok(Self {
            peer_id,
            connection_type,
            state,
            created_at: Instant::now(),
            peer_connection,
            pending_candidates: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Get the remote peer ID
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Media kinds this leg was negotiated with
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Whether this leg has sat in negotiation for longer than
    /// `timeout` without reaching Connected.
    ///
    /// A lost offer or answer leaves the leg in New forever. That is
    /// not a terminal state, so nothing reaps it; the manager treats a
    /// stalled leg like a terminal one and rebuilds it from scratch.
    pub async fn is_stalled(&self, timeout: Duration) -> bool {
        matches!(
            *self.state.read().await,
            ConnectionState::New | ConnectionState::Connecting
        ) && self.created_at.elapsed() >= timeout
    }

    /// Create an SDP offer and set it as the local description
    pub async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer for peer {}", self.peer_id);

        Ok(SessionDescription::from_rtc(SdpKind::Offer, &local_desc))
    }

    /// Accept a remote offer and produce the answer.
    ///
    /// Sets the remote description, flushes any queued remote
    /// candidates, then creates and sets the local answer.
    pub async fn accept_offer(&self, offer: &SessionDescription) -> Result<SessionDescription> {
        self.set_remote_description(offer.to_rtc()?).await?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting answer".to_string())
            })?;

        debug!("Created SDP answer for peer {}", self.peer_id);

        Ok(SessionDescription::from_rtc(SdpKind::Answer, &local_desc))
    }

    /// Accept the remote answer to our offer
    pub async fn accept_answer(&self, answer: &SessionDescription) -> Result<()> {
        debug!("Accepting SDP answer from peer {}", self.peer_id);

        self.set_remote_description(answer.to_rtc()?).await
    }

    /// Set the remote description and flush queued candidates in
    /// arrival order. Holds the queue lock across both steps so a
    /// candidate arriving concurrently cannot be applied out of order.
    async fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        let mut pending = self.pending_candidates.lock().await;

        self.peer_connection
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        if !pending.is_empty() {
            debug!(
                "Flushing {} queued ICE candidates for peer {}",
                pending.len(),
                self.peer_id
            );
        }

        for candidate in pending.drain(..) {
            self.apply_candidate(candidate).await?;
        }

        Ok(())
    }

    /// Add a remote ICE candidate.
    ///
    /// Candidates arriving before the remote description are queued and
    /// applied when the description lands.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut pending = self.pending_candidates.lock().await;

        if self.peer_connection.remote_description().await.is_none() {
            debug!(
                "Queueing ICE candidate for peer {} (no remote description yet)",
                self.peer_id
            );
            pending.push(candidate);
            return Ok(());
        }

        drop(pending);

        self.apply_candidate(candidate).await
    }

    async fn apply_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit::from(candidate))
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    /// Number of remote candidates waiting for the remote description
    pub async fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().await.len()
    }

    /// Add a local capture track to this leg.
    ///
    /// Returns the RTP sender so the media session can hot-swap the
    /// track on device switches.
    pub async fn add_local_track(
        &self,
        kind: TrackKind,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<Arc<RTCRtpSender>> {
        let sender = self
            .peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {:?} track: {}", kind, e))
            })?;

        debug!("Added local {:?} track for peer {}", kind, self.peer_id);

        Ok(sender)
    }

    /// Register a handler for locally gathered ICE candidates.
    ///
    /// The handler receives wire-ready candidates; end-of-gathering is
    /// not reported.
    pub fn on_ice_candidate<F>(&self, handler: F)
    where
        F: Fn(IceCandidate) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let peer_id = self.peer_id.clone();

        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let handler = Arc::clone(&handler);
                let peer_id = peer_id.clone();

                Box::pin(async move {
                    if let Some(candidate) = candidate {
                        match candidate.to_json() {
                            Ok(init) => handler(IceCandidate::from(init)),
                            Err(e) => {
                                warn!(
                                    "Failed to serialize local ICE candidate for peer {}: {}",
                                    peer_id, e
                                );
                            }
                        }
                    }
                })
            }));
    }

    /// Register a handler for incoming remote media tracks
    pub fn on_track<F>(&self, handler: F)
    where
        F: Fn(
                Arc<TrackRemote>,
                Arc<RTCRtpReceiver>,
                Arc<RTCRtpTransceiver>,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        self.peer_connection.on_track(Box::new(handler));
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        info!("Closing peer connection for peer {}", self.peer_id);

        *self.state.write().await = ConnectionState::Closed;

        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::devices::new_local_track;
    use crate::config::CaptureConstraints;

    fn test_config() -> HubConfig {
        HubConfig::default()
    }

    async fn new_leg(peer_id: &str) -> PeerConnection {
        let (terminal_tx, _terminal_rx) = mpsc::unbounded_channel();
        PeerConnection::new(
            peer_id.to_string(),
            ConnectionType::Audio,
            &test_config(),
            terminal_tx,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_connection_state() {
        let pc = new_leg("peer-test").await;

        assert_eq!(pc.peer_id(), "peer-test");
        assert_eq!(pc.state().await, ConnectionState::New);
        assert_eq!(pc.connection_type(), ConnectionType::Audio);
    }

    #[tokio::test]
    async fn test_create_offer_includes_audio() {
        let pc = new_leg("peer-test").await;

        let track = new_local_track(TrackKind::Audio, &CaptureConstraints::default(), "stream-0");
        pc.add_local_track(TrackKind::Audio, track).await.unwrap();

        let offer = pc.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(!offer.includes_video());
    }

    #[tokio::test]
    async fn test_offer_answer_handshake() {
        let caller = new_leg("peer-b").await;
        let callee = new_leg("peer-a").await;

        let track = new_local_track(TrackKind::Audio, &CaptureConstraints::default(), "stream-0");
        caller
            .add_local_track(TrackKind::Audio, track)
            .await
            .unwrap();

        let offer = caller.create_offer().await.unwrap();
        let answer = callee.accept_offer(&offer).await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);

        caller.accept_answer(&answer).await.unwrap();
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued() {
        let pc = new_leg("peer-test").await;

        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 10.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };

        pc.add_ice_candidate(candidate.clone()).await.unwrap();
        pc.add_ice_candidate(candidate).await.unwrap();

        // No remote description yet, so nothing was applied
        assert_eq!(pc.pending_candidate_count().await, 2);
    }

    #[tokio::test]
    async fn test_queued_candidates_flush_with_remote_description() {
        let caller = new_leg("peer-b").await;
        let callee = new_leg("peer-a").await;

        let track = new_local_track(TrackKind::Audio, &CaptureConstraints::default(), "stream-0");
        caller
            .add_local_track(TrackKind::Audio, track)
            .await
            .unwrap();
        let offer = caller.create_offer().await.unwrap();

        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2122252543 10.0.0.1 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };

        callee.add_ice_candidate(candidate.clone()).await.unwrap();
        callee.add_ice_candidate(candidate).await.unwrap();
        assert_eq!(callee.pending_candidate_count().await, 2);

        // Setting the remote description drains the queue
        callee.accept_offer(&offer).await.unwrap();
        assert_eq!(callee.pending_candidate_count().await, 0);
    }

    #[tokio::test]
    async fn test_terminal_state_detection() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(ConnectionState::Closed.is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
        assert!(!ConnectionState::New.is_terminal());
    }

    #[tokio::test]
    async fn test_close_sets_terminal_state() {
        let pc = new_leg("peer-test").await;

        pc.close().await.unwrap();
        assert!(pc.state().await.is_terminal());
    }

    #[tokio::test]
    async fn test_unanswered_leg_stalls_after_timeout() {
        let pc = new_leg("peer-test").await;

        assert!(!pc.is_stalled(Duration::from_secs(10)).await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(pc.is_stalled(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_closed_leg_is_terminal_not_stalled() {
        let pc = new_leg("peer-test").await;
        pc.close().await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pc.is_stalled(Duration::from_millis(10)).await);
    }
}
