use std::sync::Arc;

use crate::client::bucket::Bucket;
use crate::client::connection::HostConnection;
use crate::config::HostAddr;
use crate::error::CacheError;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// A pure, stable hash of a key's UTF-8 bytes, identical across clients
/// (spec §4.10's "deterministic_hash"). FNV-1a replaces the source's
/// recursive range search entirely; it plays no other role.
pub fn deterministic_hash(s: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Ordered list of buckets built from the configured host list and
/// redundancy factor (C10). Hosts are sorted by `(address, port)` before
/// bucketing so every client partitions identically.
pub struct RouterTable {
    buckets: Vec<Bucket>,
}

impl RouterTable {
    pub fn new(mut hosts: Vec<(HostAddr, Arc<HostConnection>)>, redundancy_layers: u32) -> Self {
        hosts.sort_by(|a, b| (a.0.address.clone(), a.0.port).cmp(&(b.0.address.clone(), b.0.port)));

        let bucket_size = redundancy_layers as usize + 1;
        let buckets = hosts
            .chunks(bucket_size)
            .map(|chunk| Bucket::new(chunk.iter().map(|(_, conn)| conn.clone()).collect()))
            .collect();

        RouterTable { buckets }
    }

    fn online_bucket_indexes(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_fully_offline())
            .map(|(i, _)| i)
            .collect()
    }

    /// Resolves `key` to a bucket index: hash, modulo the count of online
    /// buckets, then index into the online-bucket list (spec §4.10).
    pub fn bucket_index_for(&self, key: &str) -> Result<usize, CacheError> {
        let online = self.online_bucket_indexes();
        if online.is_empty() {
            return Err(CacheError::NoHostsAvailable);
        }
        let idx = (deterministic_hash(key) as usize) % online.len();
        Ok(online[idx])
    }

    pub fn bucket_for(&self, key: &str) -> Result<&Bucket, CacheError> {
        Ok(&self.buckets[self.bucket_index_for(key)?])
    }

    /// Tag-scoped operations hash the tag string instead of a key, so every
    /// key sharing a tag lands on the same bucket.
    pub fn bucket_for_tag(&self, tag: &str) -> Result<&Bucket, CacheError> {
        self.bucket_for(tag)
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_pure_and_stable() {
        assert_eq!(deterministic_hash("user:1"), deterministic_hash("user:1"));
        assert_ne!(deterministic_hash("user:1"), deterministic_hash("user:2"));
    }
}
