use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use crate::common::{client_for, settle, spawn_host};
use hivecache::client::{ClientEvent, Expiration, PutOptions};

/// A tagged, absolute-expiry entry with `notify=true` delivers exactly one
/// `expire` event to the subscribing connection, and the key drops out of
/// both plain lookup and its tag (spec §8 scenario 3).
#[tokio::test]
async fn expiring_entry_notifies_and_drops_tag_membership() {
    let host = spawn_host(None).await;
    let client = client_for(vec![host.addr.clone()], 0);
    settle().await;

    // The wire format for `-a` truncates to whole seconds, so leave enough
    // margin that the truncation itself can't expire the entry early.
    let deadline = Utc::now() + chrono::Duration::seconds(2);
    client
        .put(
            "k",
            Bytes::from_static(b"v"),
            PutOptions { tag: Some("T".to_string()), notify_on_remove: true },
            Expiration::Absolute(deadline),
        )
        .await
        .unwrap();

    assert_eq!(client.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));

    // Drain past the `Reconnected` event queued during setup and wait for the
    // `Expired` notification specifically.
    let expired = tokio::time::timeout(Duration::from_secs(4), async {
        loop {
            match client.next_event().await {
                Some(ClientEvent::Expired(key)) => return Some(key),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await;
    assert_eq!(expired.unwrap(), Some("k".to_string()));

    assert_eq!(client.get("k").await.unwrap(), None);

    host.cancel.cancel();
}
