pub mod intern;
pub mod tags;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use regex::RegexBuilder;
use sysinfo::{Pid, System};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::intern::InternTable;
use crate::engine::tags::TagIndex;
use crate::error::{PersistenceError, ProtocolError};
use crate::persist::DiskPersister;
use crate::types::entry::SubscriberId;
use crate::types::{CacheEntry, PersistedRecord, Policy};

/// An `expire` delivery the host must push to one subscribed connection.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subscriber: SubscriberId,
    pub key: String,
}

/// The primary keyed store (C6). Owns the tag index and intern table as
/// auxiliary views and, optionally, a disk persister mirroring non-interned
/// writes.
///
/// Lock order when an operation needs more than one: engine's own `store`
/// lock, then the intern table's lock, then the tag index's lock — fixed
/// per spec §4.6 to avoid deadlock.
pub struct Engine {
    store: RwLock<HashMap<String, CacheEntry>>,
    tags: TagIndex,
    intern: InternTable,
    persister: Option<Arc<DiskPersister>>,
    memory_limit_pct: f64,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

impl Engine {
    /// Builds a fresh, empty engine and returns the channel over which it
    /// emits `expire` notifications for the host server to deliver.
    pub fn new(
        memory_limit_pct: f64,
        persister: Option<Arc<DiskPersister>>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Notification>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Engine {
            store: RwLock::new(HashMap::new()),
            tags: TagIndex::new(),
            intern: InternTable::new(),
            persister,
            memory_limit_pct,
            notify_tx,
        });
        (engine, notify_rx)
    }

    /// Restores a previously persisted record via a plain `add`, matching
    /// spec §6's startup behavior (expiration state is not restored).
    pub fn restore(&self, record: PersistedRecord) {
        let value = Bytes::from(record.value);
        if record.interned {
            self.add_interned(record.key, value, record.tag, None);
        } else {
            self.add_plain(record.key, value, Policy::NoExpiration, record.tag, false, None, false);
        }
    }

    /// Inserts or replaces `key`. Interned policies route through C5;
    /// everything else is stored directly with its expiration metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        key: String,
        value: Bytes,
        policy: Policy,
        tag: Option<String>,
        notify: bool,
        subscriber: Option<SubscriberId>,
    ) {
        if policy.is_interned() {
            self.add_interned(key, value, tag, subscriber);
        } else {
            self.add_plain(key, value, policy, tag, notify, subscriber, true);
        }
    }

    fn add_plain(
        &self,
        key: String,
        value: Bytes,
        policy: Policy,
        tag: Option<String>,
        notify: bool,
        subscriber: Option<SubscriberId>,
        persist: bool,
    ) {
        let mut entry = CacheEntry::new(key.clone(), value.clone(), policy, tag.clone(), notify);
        if notify {
            if let Some(sub) = subscriber {
                entry.subscribers.insert(sub);
            }
        }

        {
            let mut store = self.store.write();
            store.insert(key.clone(), entry);
        }

        match &tag {
            Some(t) => self.tags.add(&key, t),
            None => self.tags.remove(&key),
        }

        if persist {
            self.persist_async(PersistedRecord { key, value: value.to_vec(), interned: false, tag });
        }
    }

    fn add_interned(&self, key: String, value: Bytes, tag: Option<String>, subscriber: Option<SubscriberId>) {
        let _ = subscriber; // interned entries never notify; see Policy::is_interned in CacheEntry::new.
        let mut store = self.store.write();
        let outcome = self.intern.add(&key, &value);

        if outcome.is_first_reference {
            let synth_key = InternTable::synthetic_key(outcome.hash);
            store.insert(synth_key.clone(), CacheEntry::new_synthetic(synth_key, value.clone()));
        }
        if let Some(released) = outcome.released {
            store.remove(&InternTable::synthetic_key(released));
        }

        let pointer = CacheEntry::new(key.clone(), value, Policy::Interned, tag.clone(), false);
        store.insert(key.clone(), pointer);
        drop(store);

        match &tag {
            Some(t) => self.tags.add(&key, t),
            None => self.tags.remove(&key),
        }
    }

    /// Takes only a shared lock: `touch()` mutates an entry's own interior
    /// timing state, so concurrent `get`s never block each other (spec
    /// §4.6/§4.7's unlimited read-concurrency invariant).
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let store = self.store.read();
        let entry = store.get(key)?;
        entry.touch();
        Some(entry.value.clone())
    }

    pub fn remove(&self, key: &str) {
        let removed = {
            let mut store = self.store.write();
            store.remove(key)
        };
        let Some(entry) = removed else { return };

        if entry.policy.is_interned() {
            if let Some(outcome) = self.intern.remove(key) {
                if let Some(released) = outcome.released {
                    self.store.write().remove(&InternTable::synthetic_key(released));
                }
            }
        } else if let Some(persister) = &self.persister {
            let persister = persister.clone();
            let owned_key = key.to_string();
            tokio::spawn(async move {
                if let Err(e) =
                    tokio::task::spawn_blocking(move || persister.remove(&owned_key)).await.unwrap()
                {
                    warn!(error = %e, "failed to remove persisted record");
                }
            });
        }

        self.tags.remove(key);
        self.dispatch_removal_notifications(&entry);
    }

    fn dispatch_removal_notifications(&self, entry: &CacheEntry) {
        if !entry.notify_on_remove {
            return;
        }
        for subscriber in &entry.subscribers {
            let _ = self.notify_tx.send(Notification { subscriber: *subscriber, key: entry.key.clone() });
        }
    }

    /// Enumerates live (non-synthetic) keys matching `pattern` (`*`/`None`
    /// matches all; otherwise a case-insensitive regex) and, if `tags` is
    /// non-empty, restricted to keys carrying one of those tags.
    pub fn select_keys(
        &self,
        pattern: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<String>, ProtocolError> {
        let re = match pattern {
            None | Some("*") => None,
            Some(p) => Some(
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|_| ProtocolError::InvalidArgument(format!("bad pattern {p}")))?,
            ),
        };

        let tag_filter = if tags.is_empty() {
            None
        } else {
            let mut set = std::collections::HashSet::new();
            for t in tags {
                set.extend(self.tags.keys_of(t));
            }
            Some(set)
        };

        let store = self.store.read();
        let mut out: Vec<String> = store
            .iter()
            .filter(|(_, e)| !e.synthetic)
            .filter(|(k, _)| re.as_ref().map_or(true, |r| r.is_match(k)))
            .filter(|(k, _)| tag_filter.as_ref().map_or(true, |set| set.contains(*k)))
            .map(|(k, _)| k.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    /// Live entry count, counting an interned key once per referencing key
    /// rather than per stored content (spec §4.6).
    pub fn count(&self) -> usize {
        self.store.read().values().filter(|e| !e.synthetic).count()
    }

    /// Drops everything: the store, tag index, intern table, and (if
    /// configured) the persisted directory, in lockstep.
    pub fn clear(&self) {
        {
            let mut store = self.store.write();
            *store = HashMap::new();
        }
        self.tags.clear();
        self.intern.clear();
        if let Some(persister) = &self.persister {
            if let Err(e) = persister.clear_all() {
                warn!(error = %e, "failed to clear persisted directory");
            }
        }
    }

    /// Drops `subscriber` from every entry's subscriber set. Called when a
    /// host connection closes (spec §4.7).
    pub fn drop_subscriber(&self, subscriber: SubscriberId) {
        let mut store = self.store.write();
        for entry in store.values_mut() {
            entry.subscribers.remove(&subscriber);
        }
    }

    fn persist_async(&self, record: PersistedRecord) {
        let Some(persister) = self.persister.clone() else { return };
        tokio::spawn(async move {
            let result: Result<(), PersistenceError> =
                tokio::task::spawn_blocking(move || persister.persist(&record)).await.unwrap();
            if let Err(e) = result {
                warn!(error = %e, "failed to persist record");
            }
        });
    }

    /// Runs forever, sweeping expired entries at `interval`. Intended to be
    /// driven by `tokio::spawn(engine.clone().run_expiration_sweep(..))`.
    pub async fn run_expiration_sweep(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.sweep_expired();
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let store = self.store.read();
            store
                .values()
                .filter(|e| !e.synthetic && e.is_expired(now))
                .map(|e| e.key.clone())
                .collect()
        };
        for key in expired {
            debug!(%key, "sweeping expired entry");
            self.remove(&key);
        }
    }

    /// Runs forever, checking resident-memory pressure at `interval` and
    /// evicting non-interned entries in least-recently-touched order until
    /// headroom is restored (spec §4.6).
    pub async fn run_memory_watch(self: Arc<Self>, interval: Duration) {
        let mut sys = System::new_all();
        let pid = Pid::from(std::process::id() as usize);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.evict_under_pressure(&mut sys, pid);
        }
    }

    fn evict_under_pressure(&self, sys: &mut System, pid: Pid) {
        if self.memory_limit_pct <= 0.0 {
            return;
        }
        sys.refresh_all();
        let total = sys.total_memory();
        if total == 0 {
            return;
        }

        let used_pct = |sys: &System| -> Option<f64> {
            sys.process(pid).map(|p| (p.memory() as f64 / total as f64) * 100.0)
        };

        let Some(pct) = used_pct(sys) else { return };
        if pct < self.memory_limit_pct {
            return;
        }

        warn!(used_pct = pct, limit_pct = self.memory_limit_pct, "evicting entries under memory pressure");

        loop {
            let victim = {
                let store = self.store.read();
                store
                    .values()
                    .filter(|e| !e.synthetic && !e.policy.is_interned())
                    .min_by_key(|e| e.last_touched())
                    .map(|e| e.key.clone())
            };
            let Some(key) = victim else { break };
            self.remove(&key);

            sys.refresh_all();
            match used_pct(sys) {
                Some(pct) if pct >= self.memory_limit_pct => continue,
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_engine() -> Arc<Engine> {
        Engine::new(0.0, None).0
    }

    #[test]
    fn add_then_get_round_trips() {
        let engine = new_engine();
        engine.add("k".into(), Bytes::from_static(b"v"), Policy::NoExpiration, None, false, None);
        assert_eq!(engine.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn last_write_wins() {
        let engine = new_engine();
        engine.add("k".into(), Bytes::from_static(b"v1"), Policy::NoExpiration, None, false, None);
        engine.add("k".into(), Bytes::from_static(b"v2"), Policy::NoExpiration, None, false, None);
        assert_eq!(engine.get("k"), Some(Bytes::from_static(b"v2")));
    }

    #[test]
    fn remove_drops_tag_association() {
        let engine = new_engine();
        engine.add("k".into(), Bytes::from_static(b"v"), Policy::NoExpiration, Some("t".into()), false, None);
        assert_eq!(engine.select_keys(None, &["t".to_string()]).unwrap(), vec!["k".to_string()]);
        engine.remove("k");
        assert!(engine.select_keys(None, &["t".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn interning_survives_partial_removal() {
        let engine = new_engine();
        let value = Bytes::from_static(b"hello");
        engine.add("a".into(), value.clone(), Policy::Interned, None, false, None);
        engine.add("b".into(), value.clone(), Policy::Interned, None, false, None);
        engine.remove("a");
        assert_eq!(engine.get("b"), Some(value));
        assert_eq!(engine.count(), 1);
    }

    #[test]
    fn count_excludes_synthetic_entries() {
        let engine = new_engine();
        let value = Bytes::from_static(&[0u8; 64]);
        engine.add("a".into(), value.clone(), Policy::Interned, None, false, None);
        engine.add("b".into(), value, Policy::Interned, None, false, None);
        assert_eq!(engine.count(), 2);
    }

    #[test]
    fn clear_drops_everything() {
        let engine = new_engine();
        engine.add("k".into(), Bytes::from_static(b"v"), Policy::NoExpiration, None, false, None);
        engine.clear();
        assert_eq!(engine.count(), 0);
        assert_eq!(engine.get("k"), None);
    }

    #[test]
    fn select_keys_matches_regex_case_insensitively() {
        let engine = new_engine();
        engine.add("User:1".into(), Bytes::from_static(b"v"), Policy::NoExpiration, None, false, None);
        engine.add("order:1".into(), Bytes::from_static(b"v"), Policy::NoExpiration, None, false, None);
        let matched = engine.select_keys(Some("^user:"), &[]).unwrap();
        assert_eq!(matched, vec!["User:1".to_string()]);
    }
}
