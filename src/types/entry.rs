use std::collections::HashSet;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Identifies a client connection that has asked to be told when a key
/// leaves the cache. Assigned by the host server per accepted connection.
pub type SubscriberId = u64;

/// How an entry's lifetime is managed. See spec §3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Lives until explicitly removed or evicted under memory pressure.
    NoExpiration,
    /// Expires at a fixed UTC instant, wire form `yyMMddHHmmss`.
    AbsoluteAt(DateTime<Utc>),
    /// Expires `ttl` after the last successful read; reading resets the
    /// clock.
    Sliding(Duration),
    /// Never expires, never evicted by memory pressure, and deduplicated by
    /// content hash via the intern table (C5).
    Interned,
}

impl Policy {
    pub fn is_interned(&self) -> bool {
        matches!(self, Policy::Interned)
    }
}

/// `deadline` and `last_touched` behind one lock so `touch()` can run on a
/// shared `&CacheEntry` — `get` only needs the store's read lock, keeping
/// concurrent reads from serializing against each other (spec §4.6/§4.7).
#[derive(Debug)]
struct Timing {
    /// Resolved point in time at which this entry should be swept, derived
    /// from `policy`. `None` for `NoExpiration` and `Interned`.
    deadline: Option<Instant>,
    /// Last time this entry was read or written; used as the LRU ordering
    /// key for memory-pressure eviction.
    last_touched: Instant,
}

/// The primary record held by the memory cache engine (C6).
///
/// Invariant: at most one live `CacheEntry` exists per `key` at a time. An
/// interned entry ignores `deadline` and `notify_on_remove`.
#[derive(Debug)]
pub struct CacheEntry {
    pub key: String,
    pub value: Bytes,
    pub tag: Option<String>,
    pub policy: Policy,
    timing: Mutex<Timing>,
    pub notify_on_remove: bool,
    pub subscribers: HashSet<SubscriberId>,
    /// True for the engine-internal entries that back deduplicated interned
    /// content (C5). Invisible to `keys()`/`count()`/user-facing lookups.
    pub synthetic: bool,
}

impl CacheEntry {
    pub fn new(
        key: String,
        value: Bytes,
        policy: Policy,
        tag: Option<String>,
        notify_on_remove: bool,
    ) -> Self {
        let now = Instant::now();
        let deadline = Self::initial_deadline(&policy, now);
        // An interned entry never notifies on removal: it has no single
        // owning write, and its lifetime is governed by refcounting.
        let notify_on_remove = notify_on_remove && !policy.is_interned();

        CacheEntry {
            key,
            value,
            tag,
            policy,
            timing: Mutex::new(Timing { deadline, last_touched: now }),
            notify_on_remove,
            subscribers: HashSet::new(),
            synthetic: false,
        }
    }

    /// An engine-internal entry storing deduplicated bytes for an interned
    /// content hash. Never expires, never evicted, carries no key the user
    /// could address directly.
    pub fn new_synthetic(key: String, value: Bytes) -> Self {
        CacheEntry {
            key,
            value,
            tag: None,
            policy: Policy::Interned,
            timing: Mutex::new(Timing { deadline: None, last_touched: Instant::now() }),
            notify_on_remove: false,
            subscribers: HashSet::new(),
            synthetic: true,
        }
    }

    fn initial_deadline(policy: &Policy, now: Instant) -> Option<Instant> {
        match policy {
            Policy::NoExpiration | Policy::Interned => None,
            Policy::AbsoluteAt(at) => {
                let delta = *at - Utc::now();
                match delta.to_std() {
                    Ok(d) => Some(now + d),
                    // Already in the past: expire as soon as the next sweep
                    // runs rather than panicking on a negative duration.
                    Err(_) => Some(now),
                }
            },
            Policy::Sliding(ttl) => Some(now + *ttl),
        }
    }

    /// Resets the sliding-expiration clock and bumps the LRU timestamp.
    /// No-op for policies without a moving deadline. Takes `&self`, not
    /// `&mut self`, so a `get` only needs the store's read lock.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut timing = self.timing.lock();
        timing.last_touched = now;
        if let Policy::Sliding(ttl) = self.policy {
            timing.deadline = Some(now + ttl);
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.timing.lock().deadline, Some(d) if now >= d)
    }

    pub fn last_touched(&self) -> Instant {
        self.timing.lock().last_touched
    }
}
