//! Peer connection lifecycle management
//!
//! At most one connection entry exists per remote peer. Offer direction
//! is deterministic: the lexicographically greater peer id initiates,
//! the other side answers, so two peers discovering each other on the
//! same tick never produce crossed offers.

use crate::config::HubConfig;
use crate::media::{MediaSessionManager, TrackKind};
use crate::peer::connection::PeerConnection;
use crate::signaling::{
    ConnectionType, IceCandidate, SessionDescription, SignalMessage, SignalingRelay,
};
use crate::Result;
use copresence_core::PeerId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Whether the local peer sends the offer when connecting to `remote`.
///
/// The greater peer id initiates. Applied uniformly at every initiation
/// site so both sides always agree on the direction.
pub fn initiates(local: &str, remote: &str) -> bool {
    local > remote
}

/// Manages the set of active call legs.
///
/// All mutating operations are idempotent and serialized behind one
/// lock, so the polling trackers can call them every tick without
/// coordinating with each other or with the signaling handlers.
pub struct PeerManager {
    /// Our peer id
    local_peer_id: PeerId,

    /// Hub configuration (ICE servers)
    config: HubConfig,

    /// Local media session, source of outgoing tracks
    media: Arc<MediaSessionManager>,

    /// Signaling relay for offers, answers and candidates
    relay: Arc<dyn SignalingRelay>,

    /// Active connection entries, at most one per peer
    entries: Arc<RwLock<HashMap<PeerId, Arc<PeerConnection>>>>,

    /// Remote media tracks received per peer
    remote_tracks: Arc<RwLock<HashMap<PeerId, Vec<Arc<TrackRemote>>>>>,

    /// Serializes connect/disconnect/renegotiate/offer handling
    ops: Mutex<()>,

    /// Notified by a connection when it reaches a terminal state
    terminal_tx: mpsc::UnboundedSender<PeerId>,

    /// Receiver half, handed to the hub's reaper task
    terminal_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerId>>>,
}

impl PeerManager {
    /// Create a peer manager.
    ///
    /// # Arguments
    ///
    /// * `local_peer_id` - our transport-level identity
    /// * `config` - ICE server configuration
    /// * `media` - local media session
    /// * `relay` - signaling relay
    pub fn new(
        local_peer_id: PeerId,
        config: HubConfig,
        media: Arc<MediaSessionManager>,
        relay: Arc<dyn SignalingRelay>,
    ) -> Self {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();

        Self {
            local_peer_id,
            config,
            media,
            relay,
            entries: Arc::new(RwLock::new(HashMap::new())),
            remote_tracks: Arc::new(RwLock::new(HashMap::new())),
            ops: Mutex::new(()),
            terminal_tx,
            terminal_rx: Mutex::new(Some(terminal_rx)),
        }
    }

    /// Our peer id
    pub fn local_peer_id(&self) -> &str {
        &self.local_peer_id
    }

    /// Take the terminal event stream. Yields the peer id of every
    /// connection that reaches a terminal state; the consumer calls
    /// [`reap`](Self::reap). Can only be taken once.
    pub async fn take_terminal_events(&self) -> Option<mpsc::UnboundedReceiver<PeerId>> {
        self.terminal_rx.lock().await.take()
    }

    /// Connect to a peer.
    ///
    /// Idempotent: an existing live entry makes this a no-op, as does
    /// calling it on the answering side (the greater peer id sends the
    /// offer; we wait for it). Local media must be acquired first;
    /// otherwise the call is skipped and a later tick retries. An entry
    /// stalled past the negotiation timeout is torn down and rebuilt.
    pub async fn connect(&self, peer_id: &str, connection_type: ConnectionType) -> Result<()> {
        if !initiates(&self.local_peer_id, peer_id) {
            return Ok(());
        }

        let _guard = self.ops.lock().await;
        self.connect_locked(peer_id, connection_type).await
    }

    async fn connect_locked(&self, peer_id: &str, connection_type: ConnectionType) -> Result<()> {
        if let Some(existing) = self.entries.read().await.get(peer_id) {
            if !existing.state().await.is_terminal()
                && !existing.is_stalled(self.negotiation_timeout()).await
            {
                return Ok(());
            }
        }

        if !self.media.is_active().await {
            debug!(
                "Skipping connect to {} until local media is acquired",
                peer_id
            );
            return Ok(());
        }

        // A terminal or stalled leftover may still occupy the slot
        self.teardown_locked(peer_id).await;

        info!("Connecting to peer {} ({:?})", peer_id, connection_type);

        let connection = self.build_connection(peer_id, connection_type).await?;

        // The entry is registered now. A failure past this point would
        // leave a leg that never negotiates, so tear it down before
        // propagating the error.
        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.teardown_locked(peer_id).await;
                return Err(e);
            }
        };

        let sent = self.relay.send(
            peer_id,
            SignalMessage::Offer {
                to_peer_id: peer_id.to_string(),
                offer,
            },
        );

        if let Err(e) = sent {
            self.teardown_locked(peer_id).await;
            return Err(e);
        }

        Ok(())
    }

    /// Handle an incoming offer.
    ///
    /// A fresh offer supersedes whatever leg we had with this peer,
    /// since the initiator restarts from scratch on upgrade and on
    /// terminal states. The local connection mirrors the offer's media
    /// kinds so negotiation stays symmetric.
    pub async fn handle_offer(&self, from: &str, offer: &SessionDescription) -> Result<()> {
        let _guard = self.ops.lock().await;

        self.teardown_locked(from).await;

        let connection_type = if offer.includes_video() {
            ConnectionType::Video
        } else {
            ConnectionType::Audio
        };

        info!("Answering offer from peer {} ({:?})", from, connection_type);

        let connection = self.build_connection(from, connection_type).await?;

        let answer = match connection.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.teardown_locked(from).await;
                return Err(e);
            }
        };

        let sent = self.relay.send(
            from,
            SignalMessage::Answer {
                to_peer_id: from.to_string(),
                answer,
            },
        );

        if let Err(e) = sent {
            self.teardown_locked(from).await;
            return Err(e);
        }

        Ok(())
    }

    /// Handle an incoming answer to our offer.
    ///
    /// An answer for an unknown peer is stale (the leg was torn down
    /// while the answer was in flight) and is dropped.
    pub async fn handle_answer(&self, from: &str, answer: &SessionDescription) -> Result<()> {
        let connection = match self.entries.read().await.get(from) {
            Some(c) => Arc::clone(c),
            None => {
                warn!("Dropping answer from unknown peer {}", from);
                return Ok(());
            }
        };

        connection.accept_answer(answer).await
    }

    /// Handle an incoming ICE candidate.
    ///
    /// Candidates for unknown peers are dropped; the connection itself
    /// queues candidates that arrive before the remote description.
    pub async fn handle_ice_candidate(&self, from: &str, candidate: IceCandidate) -> Result<()> {
        let connection = match self.entries.read().await.get(from) {
            Some(c) => Arc::clone(c),
            None => {
                debug!("Dropping ICE candidate for unknown peer {}", from);
                return Ok(());
            }
        };

        connection.add_ice_candidate(candidate).await
    }

    /// Disconnect from a peer. Idempotent; disconnecting an unknown
    /// peer is a no-op.
    pub async fn disconnect(&self, peer_id: &str) -> Result<()> {
        let _guard = self.ops.lock().await;
        self.teardown_locked(peer_id).await;
        Ok(())
    }

    /// Renegotiate a leg with different media kinds.
    ///
    /// Upgrades restart the connection rather than renegotiating in
    /// place: the existing leg is closed and the initiator sends a
    /// fresh offer with the new kinds. The answering side only tears
    /// down and waits for that offer. Idempotent when the leg already
    /// carries the requested kinds.
    pub async fn renegotiate(&self, peer_id: &str, connection_type: ConnectionType) -> Result<()> {
        let _guard = self.ops.lock().await;

        if let Some(existing) = self.entries.read().await.get(peer_id) {
            if existing.connection_type() == connection_type
                && !existing.state().await.is_terminal()
                && !existing.is_stalled(self.negotiation_timeout()).await
            {
                return Ok(());
            }
        }

        info!("Renegotiating peer {} as {:?}", peer_id, connection_type);

        self.teardown_locked(peer_id).await;

        if initiates(&self.local_peer_id, peer_id) {
            self.connect_locked(peer_id, connection_type).await?;
        }

        Ok(())
    }

    /// Remove the entry for a peer whose connection reached a terminal
    /// state. A non-terminal entry is left alone: the peer may already
    /// have been reconnected under the same id.
    pub async fn reap(&self, peer_id: &str) {
        let _guard = self.ops.lock().await;

        let terminal = match self.entries.read().await.get(peer_id) {
            Some(c) => c.state().await.is_terminal(),
            None => return,
        };

        if terminal {
            info!("Reaping terminated connection to peer {}", peer_id);
            self.teardown_locked(peer_id).await;
        }
    }

    fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.config.negotiation_timeout_ms)
    }

    /// Close and remove the entry for a peer, if any
    async fn teardown_locked(&self, peer_id: &str) {
        let removed = self.entries.write().await.remove(peer_id);

        if let Some(connection) = removed {
            if let Err(e) = connection.close().await {
                warn!("Error closing connection to peer {}: {}", peer_id, e);
            }

            self.media.unregister_peer(peer_id).await;
            self.remote_tracks.write().await.remove(peer_id);
        }
    }

    /// Build a connection entry: create the leg, attach local tracks,
    /// wire the signaling and track callbacks, and store it.
    async fn build_connection(
        &self,
        peer_id: &str,
        connection_type: ConnectionType,
    ) -> Result<Arc<PeerConnection>> {
        let connection = Arc::new(
            PeerConnection::new(
                peer_id.to_string(),
                connection_type,
                &self.config,
                self.terminal_tx.clone(),
            )
            .await?,
        );

        let tracks = self.media.local_tracks().await;

        if let Some(audio) = tracks.audio {
            let sender = connection.add_local_track(TrackKind::Audio, audio).await?;
            self.media
                .register_sender(peer_id, TrackKind::Audio, sender)
                .await;
        }

        if connection_type == ConnectionType::Video {
            if let Some(video) = tracks.video {
                let sender = connection.add_local_track(TrackKind::Video, video).await?;
                self.media
                    .register_sender(peer_id, TrackKind::Video, sender)
                    .await;
            }
        }

        let relay = Arc::clone(&self.relay);
        let candidate_target = peer_id.to_string();
        connection.on_ice_candidate(move |candidate| {
            let message = SignalMessage::IceCandidate {
                to_peer_id: candidate_target.clone(),
                candidate,
            };

            if let Err(e) = relay.send(&candidate_target, message) {
                warn!(
                    "Failed to relay ICE candidate to peer {}: {}",
                    candidate_target, e
                );
            }
        });

        let remote_tracks = Arc::clone(&self.remote_tracks);
        let track_owner = peer_id.to_string();
        connection.on_track(move |track, _receiver, _transceiver| {
            let remote_tracks = Arc::clone(&remote_tracks);
            let track_owner = track_owner.clone();

            Box::pin(async move {
                debug!(
                    "Received remote {} track from peer {}",
                    track.kind(),
                    track_owner
                );

                remote_tracks
                    .write()
                    .await
                    .entry(track_owner)
                    .or_default()
                    .push(track);
            })
        });

        self.entries
            .write()
            .await
            .insert(peer_id.to_string(), Arc::clone(&connection));

        Ok(connection)
    }

    /// Whether an entry exists for this peer (in any non-terminal state)
    pub async fn has_entry(&self, peer_id: &str) -> bool {
        match self.entries.read().await.get(peer_id) {
            Some(c) => !c.state().await.is_terminal(),
            None => false,
        }
    }

    /// Media kinds of the entry for this peer, if one exists
    pub async fn entry_connection_type(&self, peer_id: &str) -> Option<ConnectionType> {
        self.entries
            .read()
            .await
            .get(peer_id)
            .map(|c| c.connection_type())
    }

    /// Peer ids with an active entry
    pub async fn active_peers(&self) -> Vec<PeerId> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Remote media tracks received from a peer
    pub async fn remote_tracks(&self, peer_id: &str) -> Vec<Arc<TrackRemote>> {
        self.remote_tracks
            .read()
            .await
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Close every connection and clear all entries
    pub async fn shutdown(&self) {
        info!("Shutting down peer manager");

        let _guard = self.ops.lock().await;

        let peers: Vec<PeerId> = self.entries.read().await.keys().cloned().collect();
        for peer_id in peers {
            self.teardown_locked(&peer_id).await;
        }
    }
}
