use bytes::Bytes;
use crate::common::{client_for, settle, spawn_host};
use hivecache::client::{Expiration, PutOptions};

/// Non-interned writes land on disk; a fresh host pointed at the same
/// directory restores them on startup via `load_all` (spec §8 scenario 6).
#[tokio::test]
async fn restarted_host_restores_persisted_entries() {
    let dir = tempfile::tempdir().unwrap();

    let host_a = spawn_host(Some(dir.path().to_path_buf())).await;
    let client_a = client_for(vec![host_a.addr.clone()], 0);
    settle().await;

    let entries: Vec<(String, Vec<u8>)> =
        (0..20).map(|i| (format!("k{i}"), format!("v{i}").into_bytes())).collect();
    for (key, value) in &entries {
        client_a
            .put(key, Bytes::from(value.clone()), PutOptions::default(), Expiration::None)
            .await
            .unwrap();
    }
    settle().await;

    host_a.cancel.cancel();
    settle().await;

    let host_b = spawn_host(Some(dir.path().to_path_buf())).await;
    let client_b = client_for(vec![host_b.addr.clone()], 0);
    settle().await;

    for (key, value) in &entries {
        assert_eq!(client_b.get(key).await.unwrap(), Some(Bytes::from(value.clone())));
    }

    host_b.cancel.cancel();
}
