use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hivecache::client::Client;
use hivecache::config::{ClientConfig, HostAddr, HostConfig};
use hivecache::host::server;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A host spun up in-process for a test, plus the `CancellationToken` that
/// shuts it down.
pub struct SpawnedHost {
    pub addr: HostAddr,
    pub cancel: CancellationToken,
}

pub async fn spawn_host(data_dir: Option<PathBuf>) -> SpawnedHost {
    let config = HostConfig {
        listen_address: "127.0.0.1".to_string(),
        listen_port: 0,
        data_dir,
        memory_limit_pct: 0.0,
        max_frame_size: 1024 * 1024,
        expiration_sweep_interval: Duration::from_millis(100),
        memory_watch_interval: Duration::from_millis(200),
    };

    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    tokio::spawn(server::run_with_ready(config, cancel.clone(), Some(ready_tx)));

    let bound: SocketAddr = ready_rx.await.expect("host failed to start");
    SpawnedHost { addr: HostAddr { address: "127.0.0.1".to_string(), port: bound.port() }, cancel }
}

pub fn client_for(hosts: Vec<HostAddr>, redundancy_layers: u32) -> Client {
    let config = ClientConfig {
        cache_hosts: hosts,
        reconnect_interval: Duration::from_millis(50),
        redundancy_layers,
        communication_timeout: Duration::from_millis(500),
        max_frame_size: 1024 * 1024,
        send_queue_bound: 64,
    };
    Client::connect(config)
}

/// Real clients only route traffic once the underlying TCP connections come
/// up; this mirrors waiting for a readiness probe before sending load.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
