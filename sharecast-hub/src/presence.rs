//! Room presence with TTL expiry.
//!
//! An identity stays listed while it keeps re-joining (heartbeats) within the TTL.
//! Expired entries are purged lazily by `list_active`, across all rooms.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sharecast_core::models::{Identity, RoomId};
use sharecast_core::Result;
use tokio::time::Instant;
use tracing::debug;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Insert or refresh `identity` in `room`.
    async fn join(&self, room: &RoomId, identity: &Identity) -> Result<()>;

    /// Remove immediately. Returns whether an entry existed.
    async fn leave(&self, room: &RoomId, identity: &Identity) -> Result<bool>;

    /// Identities seen within the TTL, sorted. Purges every expired entry as a side effect.
    async fn list_active(&self, room: &RoomId) -> Result<Vec<Identity>>;
}

/// Process-local presence map
pub struct InMemoryPresenceStore {
    entries: DashMap<(RoomId, Identity), Instant>,
    ttl: Duration,
}

impl InMemoryPresenceStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries currently held, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= self.ttl);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn join(&self, room: &RoomId, identity: &Identity) -> Result<()> {
        let now = Instant::now();
        self.entries
            .entry((room.clone(), identity.clone()))
            .and_modify(|last_seen| {
                if now > *last_seen {
                    *last_seen = now;
                }
            })
            .or_insert(now);
        Ok(())
    }

    async fn leave(&self, room: &RoomId, identity: &Identity) -> Result<bool> {
        Ok(self
            .entries
            .remove(&(room.clone(), identity.clone()))
            .is_some())
    }

    async fn list_active(&self, room: &RoomId) -> Result<Vec<Identity>> {
        let purged = self.sweep(Instant::now());
        if purged > 0 {
            debug!(purged, "Expired presence entries removed");
        }

        let mut participants: Vec<Identity> = self
            .entries
            .iter()
            .filter(|entry| &entry.key().0 == room)
            .map(|entry| entry.key().1.clone())
            .collect();
        participants.sort();
        Ok(participants)
    }
}

impl Default for InMemoryPresenceStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
