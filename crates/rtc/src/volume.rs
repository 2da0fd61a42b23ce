//! Distance- and conversation-based playback gain
//!
//! Recomputed every tick; only affects gain, never connection
//! lifecycle. Conversations are private: any conversation boundary
//! between two players mutes both directions, so bystanders outside a
//! locked conversation hear neither party.

use crate::config::HubConfig;
use copresence_core::{proximity_volume, tile_distance, PeerId, PlayerSnapshot};
use std::collections::HashMap;

/// Computes the effective playback gain per remote peer.
pub struct VolumeRouter {
    /// Tile size for converting pixel coordinates
    tile_size_px: f32,

    /// Distance in tiles within which proximity gain is 1.0
    full_volume_radius_tiles: f32,

    /// Distance in tiles at which proximity gain reaches 0.0
    off_volume_radius_tiles: f32,
}

impl VolumeRouter {
    /// Create a router from the hub configuration
    pub fn new(config: &HubConfig) -> Self {
        Self {
            tile_size_px: config.tile_size_px,
            full_volume_radius_tiles: config.full_volume_radius_tiles,
            off_volume_radius_tiles: config.off_volume_radius_tiles,
        }
    }

    /// Gain for one remote peer.
    ///
    /// Same non-empty conversation: 1.0. Any conversation boundary
    /// (different ids, or exactly one side locked in): 0.0 regardless of
    /// distance. Both unlocked: the distance fade.
    pub fn gain_for(&self, local: &PlayerSnapshot, remote: &PlayerSnapshot) -> f32 {
        if local.in_conversation() || remote.in_conversation() {
            if local.conversation_id == remote.conversation_id {
                return 1.0;
            }
            return 0.0;
        }

        let distance = tile_distance(local.x, local.y, remote.x, remote.y, self.tile_size_px);

        proximity_volume(
            distance,
            self.full_volume_radius_tiles,
            self.off_volume_radius_tiles,
        )
    }

    /// Gains for every remote peer this tick
    pub fn gains(
        &self,
        local: &PlayerSnapshot,
        remotes: &[PlayerSnapshot],
    ) -> HashMap<PeerId, f32> {
        remotes
            .iter()
            .map(|remote| (remote.peer_id.clone(), self.gain_for(local, remote)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> VolumeRouter {
        // Defaults: tile 32px, full radius 5 tiles, off radius 20 tiles
        VolumeRouter::new(&HubConfig::default())
    }

    fn player_at_tiles(peer_id: &str, tiles: f32, conversation_id: &str) -> PlayerSnapshot {
        let mut p = PlayerSnapshot::new(peer_id, tiles * 32.0, 0.0);
        p.conversation_id = conversation_id.to_string();
        p
    }

    #[test]
    fn test_full_volume_inside_full_radius() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "");

        let gain = router.gain_for(&local, &player_at_tiles("peer-a", 3.0, ""));
        assert_eq!(gain, 1.0);
    }

    #[test]
    fn test_linear_fade_between_radii() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "");

        // 15 tiles with full=5, off=20: 1 - (15-5)/(20-5) = 1/3
        let gain = router.gain_for(&local, &player_at_tiles("peer-a", 15.0, ""));
        assert!((gain - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_silent_beyond_off_radius() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "");

        let gain = router.gain_for(&local, &player_at_tiles("peer-a", 25.0, ""));
        assert_eq!(gain, 0.0);
    }

    #[test]
    fn test_same_conversation_is_full_volume_at_any_distance() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "conv-1");

        let gain = router.gain_for(&local, &player_at_tiles("peer-a", 500.0, "conv-1"));
        assert_eq!(gain, 1.0);
    }

    #[test]
    fn test_different_conversation_is_muted_at_any_distance() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "conv-1");

        let gain = router.gain_for(&local, &player_at_tiles("peer-a", 0.5, "conv-2"));
        assert_eq!(gain, 0.0);
    }

    #[test]
    fn test_conversation_boundary_mutes_both_directions() {
        let router = router();
        let locked = player_at_tiles("peer-a", 0.0, "conv-1");
        let bystander = player_at_tiles("peer-b", 1.0, "");

        // Locked player does not hear the bystander
        assert_eq!(router.gain_for(&locked, &bystander), 0.0);

        // Bystander does not hear the locked player either
        assert_eq!(router.gain_for(&bystander, &locked), 0.0);
    }

    #[test]
    fn test_gains_covers_every_remote() {
        let router = router();
        let local = player_at_tiles("peer-local", 0.0, "");

        let remotes = [
            player_at_tiles("peer-a", 3.0, ""),
            player_at_tiles("peer-b", 15.0, ""),
            player_at_tiles("peer-c", 2.0, "conv-1"),
        ];

        let gains = router.gains(&local, &remotes);
        assert_eq!(gains.len(), 3);
        assert_eq!(gains["peer-a"], 1.0);
        assert!((gains["peer-b"] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(gains["peer-c"], 0.0);
    }
}
