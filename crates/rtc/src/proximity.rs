//! Proximity detection with connect/disconnect hysteresis
//!
//! Runs on the polling tick and decides, per remote peer, whether the
//! avatars have been close enough for long enough to warrant a call.
//! Both thresholds reset fully on interruption, so two avatars hovering
//! at the edge of range never flap a connection.

use crate::config::HubConfig;
use copresence_core::{tile_distance, PeerId, PlayerSnapshot};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Hysteresis state for one remote peer.
///
/// Created on first sighting, destroyed when the peer disappears from
/// the player list. Mutated only by [`ProximityDetector::tick`].
#[derive(Debug, Default)]
struct ProximityState {
    /// Whether the peer is logically in-call from proximity's view
    connected: bool,

    /// Sustained in-range time, reset to zero on leaving range
    connect_buffer_ms: u64,

    /// Sustained out-of-range time, reset to zero on re-entering range
    disconnect_buffer_ms: u64,

    /// Connect threshold reached; the next tick fires the connect
    ready_to_connect: bool,
}

/// Result of one proximity tick
#[derive(Debug, Default, PartialEq)]
pub struct ProximityTick {
    /// Peers that entered sustained range this tick
    pub connect: Vec<PeerId>,

    /// Peers that left sustained range (or vanished) this tick
    pub disconnect: Vec<PeerId>,
}

/// Per-peer proximity state machine.
///
/// The connect decision is split across two ticks on purpose: the tick
/// that satisfies the threshold only marks the peer ready, and the
/// following tick emits the connect. Both sides mark the peer connected
/// locally once the threshold is met; which side actually sends the
/// offer is the connection manager's tie-break, not proximity's
/// concern.
pub struct ProximityDetector {
    /// Range in tiles at or below which a peer accumulates connect time
    connect_range_tiles: f32,

    /// Tile size for converting pixel coordinates
    tile_size_px: f32,

    /// Sustained in-range time before connecting
    connect_threshold_ms: u64,

    /// Sustained out-of-range time before disconnecting
    disconnect_threshold_ms: u64,

    /// Hysteresis state per known remote peer
    states: HashMap<PeerId, ProximityState>,
}

impl ProximityDetector {
    /// Create a detector from the hub configuration
    pub fn new(config: &HubConfig) -> Self {
        Self {
            connect_range_tiles: config.connect_range_tiles,
            tile_size_px: config.tile_size_px,
            connect_threshold_ms: config.connect_threshold_ms,
            disconnect_threshold_ms: config.disconnect_threshold_ms,
            states: HashMap::new(),
        }
    }

    /// Advance the state machines by one tick.
    ///
    /// # Arguments
    ///
    /// * `local` - local player position this tick
    /// * `remotes` - all remote player positions this tick
    /// * `elapsed` - wall time since the previous tick
    pub fn tick(
        &mut self,
        local: &PlayerSnapshot,
        remotes: &[PlayerSnapshot],
        elapsed: Duration,
    ) -> ProximityTick {
        let elapsed_ms = elapsed.as_millis() as u64;
        let mut result = ProximityTick::default();

        for remote in remotes {
            let distance =
                tile_distance(local.x, local.y, remote.x, remote.y, self.tile_size_px);
            let in_range = distance <= self.connect_range_tiles;

            let state = self.states.entry(remote.peer_id.clone()).or_default();

            if !state.connected {
                if state.ready_to_connect {
                    state.connected = true;
                    state.ready_to_connect = false;
                    state.connect_buffer_ms = 0;

                    debug!("Peer {} entered sustained range", remote.peer_id);
                    result.connect.push(remote.peer_id.clone());
                } else if in_range {
                    state.connect_buffer_ms += elapsed_ms;
                    if state.connect_buffer_ms >= self.connect_threshold_ms {
                        state.ready_to_connect = true;
                    }
                } else {
                    // No partial credit
                    state.connect_buffer_ms = 0;
                    state.ready_to_connect = false;
                }
            } else if !in_range {
                state.disconnect_buffer_ms += elapsed_ms;
                if state.disconnect_buffer_ms >= self.disconnect_threshold_ms {
                    state.connected = false;
                    state.disconnect_buffer_ms = 0;

                    debug!("Peer {} left sustained range", remote.peer_id);
                    result.disconnect.push(remote.peer_id.clone());
                }
            } else {
                state.disconnect_buffer_ms = 0;
            }
        }

        // Peers gone from the authoritative list lose their state; if
        // one was connected, that counts as leaving range.
        let present: Vec<&PeerId> = remotes.iter().map(|r| &r.peer_id).collect();
        let vanished: Vec<PeerId> = self
            .states
            .keys()
            .filter(|id| !present.contains(id))
            .cloned()
            .collect();

        for peer_id in vanished {
            if let Some(state) = self.states.remove(&peer_id) {
                if state.connected {
                    debug!("Peer {} vanished while in range", peer_id);
                    result.disconnect.push(peer_id);
                }
            }
        }

        result
    }

    /// Whether a peer is currently in sustained range
    pub fn is_engaged(&self, peer_id: &str) -> bool {
        self.states.get(peer_id).map(|s| s.connected).unwrap_or(false)
    }

    /// Peers currently in sustained range
    pub fn engaged_peers(&self) -> Vec<PeerId> {
        self.states
            .iter()
            .filter(|(_, s)| s.connected)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(200);

    fn detector() -> ProximityDetector {
        ProximityDetector::new(&HubConfig::default())
    }

    fn player(peer_id: &str, x: f32, y: f32) -> PlayerSnapshot {
        PlayerSnapshot::new(peer_id, x, y)
    }

    fn near(peer_id: &str) -> PlayerSnapshot {
        player(peer_id, 32.0, 0.0) // 1 tile away
    }

    fn far(peer_id: &str) -> PlayerSnapshot {
        player(peer_id, 32.0 * 100.0, 0.0) // 100 tiles away
    }

    /// Ticks until the connect fires: threshold plus the decision tick
    fn ticks_to_connect() -> usize {
        (750 / 200 + 1) as usize + 1
    }

    #[test]
    fn test_sustained_range_connects() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        let mut connected = false;
        for _ in 0..ticks_to_connect() {
            let result = detector.tick(&local, &[near("peer-a")], TICK);
            if result.connect == vec!["peer-a".to_string()] {
                connected = true;
            }
        }

        assert!(connected);
        assert!(detector.is_engaged("peer-a"));
    }

    #[test]
    fn test_connect_fires_exactly_once() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        let mut connects = 0;
        for _ in 0..20 {
            connects += detector.tick(&local, &[near("peer-a")], TICK).connect.len();
        }

        assert_eq!(connects, 1);
    }

    #[test]
    fn test_interruption_resets_connect_buffer() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        // 600ms in range, not enough
        for _ in 0..3 {
            let result = detector.tick(&local, &[near("peer-a")], TICK);
            assert!(result.connect.is_empty());
        }

        // One tick out of range clears all credit
        detector.tick(&local, &[far("peer-a")], TICK);

        // 600ms more does not connect either
        for _ in 0..3 {
            let result = detector.tick(&local, &[near("peer-a")], TICK);
            assert!(result.connect.is_empty());
        }

        assert!(!detector.is_engaged("peer-a"));
    }

    #[test]
    fn test_oscillation_never_triggers_events() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        // In and out every 400ms, always under the 750ms threshold
        for _ in 0..20 {
            for _ in 0..2 {
                let result = detector.tick(&local, &[near("peer-a")], TICK);
                assert!(result.connect.is_empty());
                assert!(result.disconnect.is_empty());
            }
            for _ in 0..2 {
                let result = detector.tick(&local, &[far("peer-a")], TICK);
                assert!(result.connect.is_empty());
                assert!(result.disconnect.is_empty());
            }
        }
    }

    #[test]
    fn test_sustained_out_of_range_disconnects() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        for _ in 0..ticks_to_connect() {
            detector.tick(&local, &[near("peer-a")], TICK);
        }
        assert!(detector.is_engaged("peer-a"));

        let mut disconnected = false;
        for _ in 0..5 {
            let result = detector.tick(&local, &[far("peer-a")], TICK);
            if result.disconnect == vec!["peer-a".to_string()] {
                disconnected = true;
            }
        }

        assert!(disconnected);
        assert!(!detector.is_engaged("peer-a"));
    }

    #[test]
    fn test_reentering_range_resets_disconnect_buffer() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        for _ in 0..ticks_to_connect() {
            detector.tick(&local, &[near("peer-a")], TICK);
        }

        // 600ms out, then back in range: disconnect credit cleared
        for _ in 0..3 {
            detector.tick(&local, &[far("peer-a")], TICK);
        }
        detector.tick(&local, &[near("peer-a")], TICK);

        // Another 600ms out still does not disconnect
        for _ in 0..3 {
            let result = detector.tick(&local, &[far("peer-a")], TICK);
            assert!(result.disconnect.is_empty());
        }

        assert!(detector.is_engaged("peer-a"));
    }

    #[test]
    fn test_vanished_peer_disconnects_and_loses_state() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        for _ in 0..ticks_to_connect() {
            detector.tick(&local, &[near("peer-a")], TICK);
        }
        assert!(detector.is_engaged("peer-a"));

        let result = detector.tick(&local, &[], TICK);
        assert_eq!(result.disconnect, vec!["peer-a".to_string()]);
        assert!(!detector.is_engaged("peer-a"));
    }

    #[test]
    fn test_engaged_peers_lists_connected_only() {
        let mut detector = detector();
        let local = player("peer-local", 0.0, 0.0);

        for _ in 0..ticks_to_connect() {
            detector.tick(&local, &[near("peer-a"), far("peer-b")], TICK);
        }

        assert_eq!(detector.engaged_peers(), vec!["peer-a".to_string()]);
    }
}
