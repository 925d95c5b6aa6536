use std::collections::HashMap;

use parking_lot::RwLock;
use twox_hash::xxh3;

/// Content-addressed dedup layer (C5) for values added under the `interned`
/// policy.
///
/// Holds only the bookkeeping maps; the actual deduplicated bytes live in
/// the engine's own store under a synthetic key returned by
/// [`InternTable::synthetic_key`]. Acquire this table's lock only after the
/// engine's own lock, per the fixed engine -> intern -> tag ordering.
#[derive(Default)]
pub struct InternTable {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    key_to_hash: HashMap<String, u64>,
    hash_to_refcount: HashMap<u64, u64>,
}

/// What the engine must do to its own store as a result of an `add`/`remove`
/// call against the intern table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternOutcome {
    pub hash: u64,
    /// True if this is the first live reference to `hash`: the engine must
    /// insert the value bytes under `synthetic_key(hash)`.
    pub is_first_reference: bool,
    /// Set if `key` previously referenced a different hash whose refcount
    /// has now dropped to zero: the engine must remove that hash's stored
    /// bytes.
    pub released: Option<u64>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the content hash used to address interned values. Documented
    /// per spec §4.5/§9: widened to XXH3-64 (collisions remain possible in
    /// principle but are not expected in practice).
    pub fn hash_value(value: &[u8]) -> u64 {
        xxh3::hash64(value)
    }

    /// The engine-internal key under which deduplicated bytes for `hash` are
    /// stored. Never matches a user-supplied key: user keys are rejected
    /// with a space, and this carries none.
    pub fn synthetic_key(hash: u64) -> String {
        format!("\u{0}intern:{hash:016x}")
    }

    pub fn add(&self, key: &str, value: &[u8]) -> InternOutcome {
        let hash = Self::hash_value(value);
        let mut inner = self.inner.write();

        let released = match inner.key_to_hash.get(key).copied() {
            Some(old) if old != hash => Some(self.decrement_locked(&mut inner, old)),
            _ => None,
        }
        .flatten();

        inner.key_to_hash.insert(key.to_string(), hash);
        let count = inner.hash_to_refcount.entry(hash).or_insert(0);
        let is_first_reference = *count == 0;
        *count += 1;

        InternOutcome { hash, is_first_reference, released }
    }

    pub fn remove(&self, key: &str) -> Option<InternOutcome> {
        let mut inner = self.inner.write();
        let hash = inner.key_to_hash.remove(key)?;
        let released = self.decrement_locked(&mut inner, hash);
        Some(InternOutcome { hash, is_first_reference: false, released })
    }

    /// Decrements `hash`'s refcount, returning `Some(hash)` if it reached
    /// zero and the stored bytes should be released by the caller.
    fn decrement_locked(&self, inner: &mut Inner, hash: u64) -> Option<u64> {
        if let Some(count) = inner.hash_to_refcount.get_mut(&hash) {
            *count -= 1;
            if *count == 0 {
                inner.hash_to_refcount.remove(&hash);
                return Some(hash);
            }
        }
        None
    }

    pub fn hash_of(&self, key: &str) -> Option<u64> {
        self.inner.read().key_to_hash.get(key).copied()
    }

    pub fn refcount(&self, hash: u64) -> u64 {
        self.inner.read().hash_to_refcount.get(&hash).copied().unwrap_or(0)
    }

    /// Total live interned keys, used to cross-check `sum(refcount)` in
    /// tests (spec §4.5 invariant).
    pub fn interned_key_count(&self) -> usize {
        self.inner.read().key_to_hash.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.key_to_hash.clear();
        inner.hash_to_refcount.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_equal_content() {
        let table = InternTable::new();
        let a = table.add("a", b"hello");
        assert!(a.is_first_reference);
        let b = table.add("b", b"hello");
        assert!(!b.is_first_reference);
        assert_eq!(a.hash, b.hash);
        assert_eq!(table.refcount(a.hash), 2);
    }

    #[test]
    fn releases_content_when_last_reference_removed() {
        let table = InternTable::new();
        let a = table.add("a", b"hello");
        table.add("b", b"hello");
        table.remove("b");
        assert_eq!(table.refcount(a.hash), 1);
        let out = table.remove("a").unwrap();
        assert_eq!(out.released, Some(a.hash));
        assert_eq!(table.refcount(a.hash), 0);
    }

    #[test]
    fn reassigning_key_releases_old_content() {
        let table = InternTable::new();
        let first = table.add("a", b"hello");
        let second = table.add("a", b"world");
        assert_eq!(second.released, Some(first.hash));
        assert_eq!(table.refcount(first.hash), 0);
        assert_eq!(table.refcount(second.hash), 1);
    }
}
