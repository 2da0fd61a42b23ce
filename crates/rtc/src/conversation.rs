//! Conversation membership tracking
//!
//! Conversations are server-authoritative: each player snapshot carries
//! a conversation id, and every player sharing the local player's
//! non-empty id is a partner who must be connected with video,
//! regardless of distance. The tracker diffs the partner set each tick
//! and queues partners that appear before local media is ready; the
//! queue is flushed exactly once when the media session comes up.

use copresence_core::{PeerId, PlayerSnapshot};
use std::collections::HashSet;
use tracing::{debug, info};

/// Result of one membership tick
#[derive(Debug, Default, PartialEq)]
pub struct ConversationTick {
    /// Partners that joined the conversation and can connect now
    pub connect: Vec<PeerId>,

    /// Former partners to disconnect, unless proximity still wants them
    pub disconnect: Vec<PeerId>,

    /// Local player just entered a conversation; the media session
    /// should be auto-activated
    pub activate_media: bool,
}

/// Tracks the local player's conversation partner set.
pub struct ConversationTracker {
    /// Conversation the local player was in last tick, empty when none
    current_id: String,

    /// Partners tracked as part of the current conversation
    members: HashSet<PeerId>,

    /// Partners waiting for local media before they can be connected
    pending: HashSet<PeerId>,
}

impl ConversationTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            current_id: String::new(),
            members: HashSet::new(),
            pending: HashSet::new(),
        }
    }

    /// Advance membership by one tick.
    ///
    /// # Arguments
    ///
    /// * `local` - local player snapshot this tick
    /// * `remotes` - all remote player snapshots this tick
    /// * `media_ready` - whether the local media session is active
    pub fn tick(
        &mut self,
        local: &PlayerSnapshot,
        remotes: &[PlayerSnapshot],
        media_ready: bool,
    ) -> ConversationTick {
        let mut result = ConversationTick::default();

        if !local.in_conversation() {
            if !self.current_id.is_empty() {
                info!("Left conversation {}", self.current_id);
            }

            self.current_id.clear();
            self.pending.clear();
            result.disconnect = self.members.drain().collect();
            return result;
        }

        if self.current_id != local.conversation_id {
            info!("Entered conversation {}", local.conversation_id);
            result.activate_media = true;
            self.current_id = local.conversation_id.clone();
        }

        let partners: HashSet<PeerId> = remotes
            .iter()
            .filter(|r| r.conversation_id == local.conversation_id)
            .map(|r| r.peer_id.clone())
            .collect();

        for added in partners.difference(&self.members) {
            if media_ready {
                result.connect.push(added.clone());
            } else {
                debug!("Queueing partner {} until local media is ready", added);
                self.pending.insert(added.clone());
            }
        }

        for removed in self.members.difference(&partners) {
            self.pending.remove(removed);
            result.disconnect.push(removed.clone());
        }

        self.members = partners;

        result
    }

    /// Release the partners queued while media was unavailable.
    ///
    /// Called once when the media session becomes active. Each queued
    /// partner is returned exactly once; partners who left the
    /// conversation in the meantime were already dropped from the queue.
    pub fn flush_pending(&mut self) -> Vec<PeerId> {
        if !self.pending.is_empty() {
            info!("Flushing {} partners queued for media", self.pending.len());
        }

        self.pending.drain().collect()
    }

    /// Current conversation partners
    pub fn partners(&self) -> Vec<PeerId> {
        self.members.iter().cloned().collect()
    }

    /// Whether a peer is a current conversation partner
    pub fn is_partner(&self, peer_id: &str) -> bool {
        self.members.contains(peer_id)
    }
}

impl Default for ConversationTracker {
    fn default() -> Self {
        Self::new()
    }
}
