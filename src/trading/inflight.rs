//! Keyed in-flight dedup guard.
//!
//! Acquiring a key that is already held fails immediately, so duplicate
//! submissions are rejected rather than queued. Holds expire after a TTL in
//! case a holder never releases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::PolicyRefusal;

/// Default hold duration.
pub const DEFAULT_INFLIGHT_TTL: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Hold {
    acquired_at: Instant,
    generation: u64,
}

/// Keyed acquire/release primitive.
#[derive(Debug, Clone)]
pub struct InFlightDeduper {
    holds: Arc<DashMap<String, Hold>>,
    next_generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl InFlightDeduper {
    /// Create a deduper whose holds expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            holds: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(1)),
            ttl,
        }
    }

    /// Acquire `key`, or fail if a live hold exists.
    ///
    /// The hold is released when the returned guard drops.
    pub fn try_acquire(&self, key: impl Into<String>) -> Result<InFlightGuard, PolicyRefusal> {
        let key = key.into();
        let now = Instant::now();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        match self.holds.entry(key.clone()) {
            Entry::Occupied(mut held) => {
                if now.duration_since(held.get().acquired_at) < self.ttl {
                    debug!(key = %key, "Duplicate in-flight request rejected");
                    return Err(PolicyRefusal::DuplicateInFlight { key });
                }
                held.insert(Hold {
                    acquired_at: now,
                    generation,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Hold {
                    acquired_at: now,
                    generation,
                });
            }
        }

        Ok(InFlightGuard {
            holds: Arc::clone(&self.holds),
            key,
            generation,
        })
    }

    /// Check if `key` is currently held.
    pub fn is_held(&self, key: &str) -> bool {
        self.holds
            .get(key)
            .is_some_and(|h| h.acquired_at.elapsed() < self.ttl)
    }
}

impl Default for InFlightDeduper {
    fn default() -> Self {
        Self::new(DEFAULT_INFLIGHT_TTL)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    holds: Arc<DashMap<String, Hold>>,
    key: String,
    generation: u64,
}

impl InFlightGuard {
    /// The held key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        // An expired hold may have been taken over; only remove our own.
        self.holds
            .remove_if(&self.key, |_, hold| hold.generation == self.generation);
    }
}
