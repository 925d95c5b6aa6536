use serde::{Deserialize, Serialize};

/// The on-disk mirror of a live, non-interned `CacheEntry`. Expiration state
/// is deliberately not part of this record: a restart rehydrates entries
/// without their residual timers (spec §3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub interned: bool,
    pub tag: Option<String>,
}
