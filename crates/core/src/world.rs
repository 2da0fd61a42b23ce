//! Authoritative world-state types
//!
//! The multiplayer state-sync transport is a black box to this
//! workspace. It exposes, per player, a world position, a display name,
//! a conversation id, and a stable transport-level peer identifier.
//! The orchestration layer reads that state once per tick through the
//! [`PlayerDirectory`] trait and never mutates it.

/// Uniquely identifies a remote participant at the transport level.
///
/// Stable for the lifetime of the participant's connection to the
/// signaling relay; distinct from the state-sync session key.
pub type PeerId = String;

/// Per-player view read from the state-sync transport each tick.
///
/// Immutable per read; the core never owns the underlying state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    /// Transport-level peer identifier
    pub peer_id: PeerId,

    /// World position, x in pixel units
    pub x: f32,

    /// World position, y in pixel units
    pub y: f32,

    /// Display name
    pub name: String,

    /// Conversation the player has locked into, empty string when none
    pub conversation_id: String,
}

impl PlayerSnapshot {
    /// Create a snapshot with no conversation
    pub fn new(peer_id: impl Into<PeerId>, x: f32, y: f32) -> Self {
        Self {
            peer_id: peer_id.into(),
            x,
            y,
            name: String::new(),
            conversation_id: String::new(),
        }
    }

    /// Whether the player is currently in a conversation
    pub fn in_conversation(&self) -> bool {
        !self.conversation_id.is_empty()
    }
}

/// Read-only view of the authoritative player list.
///
/// Implemented by the state-sync adapter. Both methods are called on
/// every polling tick, so implementations should return cheap clones of
/// their latest replicated state rather than block.
pub trait PlayerDirectory: Send + Sync {
    /// Snapshot of the local player, `None` until the transport has
    /// assigned one.
    fn local_player(&self) -> Option<PlayerSnapshot>;

    /// Snapshots of all remote players currently in the world.
    fn remote_players(&self) -> Vec<PlayerSnapshot>;
}
