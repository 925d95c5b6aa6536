mod common;

#[path = "integration/cache_roundtrip.rs"]
mod cache_roundtrip;
#[path = "integration/redundancy_mirror.rs"]
mod redundancy_mirror;
#[path = "integration/tag_expiry_notify.rs"]
mod tag_expiry_notify;
#[path = "integration/persistence_restart.rs"]
mod persistence_restart;
