//! Sharded in-memory session state store.
//!
//! An explicit store object rather than module-level globals: the engine can
//! be instantiated multiple times (tests run several side by side) and the
//! lock granularity is visible.  Keys hash onto a fixed set of shards, each
//! behind its own mutex, so calls for different sessions on different shards
//! never contend, while two concurrent calls for the same session serialize
//! on their shard, preserving the read-decide-append atomicity the rate
//! limiter and trust machine rely on.
//!
//! Session keys are caller-supplied, untrusted, and unbounded in cardinality,
//! so the store is capacity-bounded: when a shard is full the
//! least-recently-seen idle session is evicted, preferring clean sessions
//! over struck ones and never touching an active ban while an alternative
//! exists.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Instant;

use crate::ratelimit::RequestLog;
use crate::trust::TrustState;

/// Everything tracked for one session key.
#[derive(Debug)]
pub struct SessionState {
    pub requests: RequestLog,
    pub trust: TrustState,
    pub last_seen: Instant,
}

impl SessionState {
    fn new(now: Instant) -> Self {
        Self {
            requests: RequestLog::default(),
            trust: TrustState::default(),
            last_seen: now,
        }
    }
}

pub struct SessionStore {
    shards: Vec<Mutex<HashMap<String, SessionState>>>,
    capacity_per_shard: usize,
}

impl SessionStore {
    /// `capacity` is the total session budget, split evenly across `shards`.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shard_count = shards.max(1);
        let capacity_per_shard = capacity.div_ceil(shard_count).max(1);
        Self {
            shards: (0..shard_count)
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            capacity_per_shard,
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<HashMap<String, SessionState>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Run `f` against the session's state under its shard lock, creating the
    /// state lazily on first contact.  `last_seen` is refreshed on every call.
    pub fn with_session<T>(
        &self,
        key: &str,
        now: Instant,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> T {
        let mut shard = lock_shard(self.shard_for(key));

        if !shard.contains_key(key) && shard.len() >= self.capacity_per_shard {
            evict_one(&mut shard, now);
        }

        let state = shard
            .entry(key.to_string())
            .or_insert_with(|| SessionState::new(now));
        state.last_seen = now;
        f(state)
    }

    /// Number of sessions currently banned.
    pub fn banned_count(&self, now: Instant) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                lock_shard(shard)
                    .values()
                    .filter(|state| state.trust.is_banned(now))
                    .count()
            })
            .sum()
    }

    /// Number of tracked sessions.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| lock_shard(shard).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A poisoned shard only means another caller panicked mid-update; the state
/// is still usable for best-effort throttling.
fn lock_shard(
    shard: &Mutex<HashMap<String, SessionState>>,
) -> std::sync::MutexGuard<'_, HashMap<String, SessionState>> {
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Eviction preference: clean sessions first, then struck-but-unbanned ones,
/// then whatever is oldest.  Within a class the least recently seen loses.
fn eviction_class(state: &SessionState, now: Instant) -> u8 {
    if state.trust.is_banned(now) {
        2
    } else if state.trust.strikes > 0 || state.trust.ban.is_some() {
        1
    } else {
        0
    }
}

fn evict_one(shard: &mut HashMap<String, SessionState>, now: Instant) {
    let victim = shard
        .iter()
        .min_by_key(|(_, state)| (eviction_class(state, now), state.last_seen))
        .map(|(key, _)| key.clone());

    if let Some(key) = victim {
        tracing::debug!(session = %crate::trust::key_preview(&key), "evicting idle session");
        shard.remove(&key);
    }
}
