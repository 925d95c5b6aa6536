use bytes::Bytes;
use crate::common::{client_for, settle, spawn_host};
use hivecache::client::router::deterministic_hash;
use hivecache::client::{Expiration, PutOptions};
use hivecache::error::CacheError;

/// Two independent hosts, no redundancy: a put lands on exactly one bucket,
/// and killing that bucket's only member turns later reads into
/// `NoHostsAvailable` (spec §8 scenario 1).
#[tokio::test]
async fn put_then_get_round_trips_and_fails_over_to_no_hosts_available() {
    let host_a = spawn_host(None).await;
    let host_b = spawn_host(None).await;

    let mut sorted = vec![(&host_a.addr, &host_a.cancel), (&host_b.addr, &host_b.cancel)];
    sorted.sort_by(|x, y| (x.0.address.clone(), x.0.port).cmp(&(y.0.address.clone(), y.0.port)));

    let key = "user:1";
    let owner_idx = (deterministic_hash(key) as usize) % 2;
    let owner_cancel = sorted[owner_idx].1.clone();

    let client = client_for(vec![host_a.addr.clone(), host_b.addr.clone()], 0);
    settle().await;

    client
        .put(key, Bytes::from_static(b"alice"), PutOptions::default(), Expiration::None)
        .await
        .unwrap();

    assert_eq!(client.get(key).await.unwrap(), Some(Bytes::from_static(b"alice")));

    owner_cancel.cancel();
    settle().await;

    let result = client.get(key).await;
    assert!(matches!(result, Err(CacheError::NoHostsAvailable)), "expected NoHostsAvailable, got {result:?}");

    host_a.cancel.cancel();
    host_b.cancel.cancel();
}

#[tokio::test]
async fn remove_drops_the_key() {
    let host = spawn_host(None).await;
    let client = client_for(vec![host.addr.clone()], 0);
    settle().await;

    client.put("k", Bytes::from_static(b"v"), PutOptions::default(), Expiration::None).await.unwrap();
    assert_eq!(client.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));

    client.remove("k").await.unwrap();
    settle().await;
    assert_eq!(client.get("k").await.unwrap(), None);

    host.cancel.cancel();
}
