use bytes::Bytes;
use crate::common::{client_for, settle, spawn_host};
use hivecache::client::{Expiration, PutOptions};

/// redundancy=1 puts both hosts in the same bucket. Writes fan out to every
/// online member, so killing one leaves the value reachable through the
/// other (spec §8 scenario 2, restart-and-reconverge half omitted: ports are
/// ephemeral in this harness, so a restarted host can't rebind the address
/// the client already holds a connection to).
#[tokio::test]
async fn reads_survive_losing_one_mirror() {
    let host_a = spawn_host(None).await;
    let host_b = spawn_host(None).await;

    let client = client_for(vec![host_a.addr.clone(), host_b.addr.clone()], 1);
    settle().await;

    client
        .put("user:1", Bytes::from_static(b"alice"), PutOptions::default(), Expiration::None)
        .await
        .unwrap();
    settle().await;

    host_a.cancel.cancel();
    settle().await;

    assert_eq!(client.get("user:1").await.unwrap(), Some(Bytes::from_static(b"alice")));

    host_b.cancel.cancel();
}
