use crate::config::HostAddr;

/// User-visible events surfaced by the client façade (spec §4.11).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// A host connection dropped and is now offline.
    Disconnected(HostAddr),
    /// A host connection came back online.
    Reconnected(HostAddr),
    /// An entry the caller subscribed to left the cache.
    Expired(String),
}
