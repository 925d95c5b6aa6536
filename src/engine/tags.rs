use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

/// Bidirectional tag index (C4): `tag -> set<key>` and `key -> tag`.
///
/// One lock guards both directions, matching spec §4.4's "single
/// reader/writer lock" requirement rather than splitting into two maps each
/// under their own lock.
#[derive(Default)]
pub struct TagIndex {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tag_to_keys: HashMap<String, HashSet<String>>,
    key_to_tag: HashMap<String, String>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `key` with `tag`, replacing any prior tag of that key.
    pub fn add(&self, key: &str, tag: &str) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.key_to_tag.get(key).cloned() {
            if old == tag {
                return;
            }
            if let Some(set) = inner.tag_to_keys.get_mut(&old) {
                set.remove(key);
                if set.is_empty() {
                    inner.tag_to_keys.remove(&old);
                }
            }
        }
        inner.tag_to_keys.entry(tag.to_string()).or_default().insert(key.to_string());
        inner.key_to_tag.insert(key.to_string(), tag.to_string());
    }

    /// Drops `key` from both directions of the index.
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.write();
        if let Some(tag) = inner.key_to_tag.remove(key) {
            if let Some(set) = inner.tag_to_keys.get_mut(&tag) {
                set.remove(key);
                if set.is_empty() {
                    inner.tag_to_keys.remove(&tag);
                }
            }
        }
    }

    /// Snapshot copy of the keys carrying `tag`, so callers may iterate
    /// without holding the index lock.
    pub fn keys_of(&self, tag: &str) -> HashSet<String> {
        self.inner.read().tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    pub fn tag_of(&self, key: &str) -> Option<String> {
        self.inner.read().key_to_tag.get(key).cloned()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tag_to_keys.clear();
        inner.key_to_tag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_prior_tag() {
        let idx = TagIndex::new();
        idx.add("k", "a");
        idx.add("k", "b");
        assert!(idx.keys_of("a").is_empty());
        assert_eq!(idx.keys_of("b"), HashSet::from(["k".to_string()]));
        assert_eq!(idx.tag_of("k").as_deref(), Some("b"));
    }

    #[test]
    fn remove_drops_both_directions() {
        let idx = TagIndex::new();
        idx.add("k1", "t");
        idx.add("k2", "t");
        idx.remove("k1");
        assert_eq!(idx.keys_of("t"), HashSet::from(["k2".to_string()]));
        assert_eq!(idx.tag_of("k1"), None);
    }
}
