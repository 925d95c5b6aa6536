use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::HostConfig;
use crate::engine::{Engine, Notification};
use crate::persist::DiskPersister;
use crate::types::entry::SubscriberId;
use crate::wire::command;
use crate::wire::frame::{Control, Frame};

/// Shared host state: the engine plus a registry mapping each connected
/// client's subscriber id to the channel its writer task drains, used to
/// deliver `expire` notifications pushed from the engine (spec §4.7).
pub struct HostServer {
    pub engine: Arc<Engine>,
    max_frame_size: u32,
    next_subscriber_id: AtomicU64,
    outboxes: RwLock<HashMap<SubscriberId, mpsc::UnboundedSender<Frame>>>,
}

impl HostServer {
    pub fn new(engine: Arc<Engine>, max_frame_size: u32) -> Arc<Self> {
        Arc::new(HostServer {
            engine,
            max_frame_size,
            next_subscriber_id: AtomicU64::new(1),
            outboxes: RwLock::new(HashMap::new()),
        })
    }

    fn register(&self, outbox: mpsc::UnboundedSender<Frame>) -> SubscriberId {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.outboxes.write().insert(id, outbox);
        id
    }

    fn unregister(&self, id: SubscriberId) {
        self.outboxes.write().remove(&id);
        self.engine.drop_subscriber(id);
    }
}

/// Runs the host: binds the listener, starts the engine's background sweeps
/// and the notification-forwarding task, and accepts connections until
/// `cancel` fires.
pub async fn run(config: HostConfig, cancel: CancellationToken) -> Result<()> {
    run_with_ready(config, cancel, None).await
}

/// Same as `run`, but reports the bound listen address on `ready` once the
/// socket is up. Used by tests that bind an ephemeral port (`listen_port:
/// 0`) and need to know which port the OS picked.
pub async fn run_with_ready(
    config: HostConfig,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<SocketAddr>>,
) -> Result<()> {
    let persister = match &config.data_dir {
        Some(dir) => Some(Arc::new(DiskPersister::new(dir).context("opening persistence directory")?)),
        None => None,
    };

    let (engine, notify_rx) = Engine::new(config.memory_limit_pct, persister.clone());

    if let Some(persister) = &persister {
        let records = persister.load_all().await.context("loading persisted records")?;
        let count = records.len();
        for record in records {
            engine.restore(record);
        }
        info!(count, "restored persisted records");
    }

    tokio::spawn(engine.clone().run_expiration_sweep(config.expiration_sweep_interval));
    tokio::spawn(engine.clone().run_memory_watch(config.memory_watch_interval));

    let server = HostServer::new(engine, config.max_frame_size);
    tokio::spawn(forward_notifications(server.clone(), notify_rx));

    let listener = TcpListener::bind((config.listen_address.as_str(), config.listen_port))
        .await
        .context("binding listener")?;

    if let Some(ready) = ready {
        let _ = ready.send(listener.local_addr()?);
    }

    accept_loop(server, listener, cancel).await
}

async fn forward_notifications(server: Arc<HostServer>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(n) = rx.recv().await {
        let outbox = server.outboxes.read().get(&n.subscriber).cloned();
        if let Some(outbox) = outbox {
            let payload = command::encode_expire_notification(&n.key);
            let _ = outbox.send(Frame::new(Control::Opaque, 0, payload));
        }
    }
}

async fn accept_loop(server: Arc<HostServer>, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        let accepted = select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => return Ok(()),
        };

        match accepted {
            Ok((conn, _)) => {
                tokio::spawn(run_session(server.clone(), conn, cancel.clone()));
            },
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        }
    }
}

#[instrument(name = "host_session", skip_all, fields(peer = %conn.peer_addr().map(|a| a.to_string()).unwrap_or_default()))]
async fn run_session(server: Arc<HostServer>, conn: TcpStream, cancel: CancellationToken) {
    if let Err(error) = conn.set_nodelay(true) {
        warn!(%error, "failed to set TCP_NODELAY");
    }

    let framed = crate::wire::framed(conn, server.max_frame_size);
    let (mut sink, mut stream) = framed.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Frame>();
    let subscriber = server.register(outbox_tx);
    debug!(subscriber, "accepted connection");

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    // A protocol error closes the connection (spec §7); a dispatch task
    // signals this via `session_cancel` rather than returning a value, since
    // reads run with unlimited concurrency and may finish out of order.
    let session_cancel = CancellationToken::new();

    loop {
        let next = select! {
            x = stream.next() => x,
            _ = cancel.cancelled() => break,
            _ = session_cancel.cancelled() => break,
        };

        let Some(result) = next else { break };

        let frame = match result {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "frame decode error, closing connection");
                break;
            },
        };

        let parsed = match command::parse(&frame.payload) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "protocol error, closing connection");
                break;
            },
        };

        let correlation = frame.correlation;
        let reply_tx = server.outboxes.read().get(&subscriber).cloned();

        // Writes apply in arrival order on this connection (spec §4.7);
        // reads may run concurrently, so only they get their own task.
        if parsed.is_write() {
            if let Err(error) = super::session::dispatch(&server.engine, subscriber, parsed) {
                warn!(%error, "protocol error, closing connection");
                break;
            }
            continue;
        }

        let server = server.clone();
        let session_cancel = session_cancel.clone();
        tokio::spawn(async move {
            let reply = match super::session::dispatch(&server.engine, subscriber, parsed) {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(%error, "protocol error, closing connection");
                    session_cancel.cancel();
                    return;
                },
            };
            if let (Some(payload), Some(tx)) = (reply, reply_tx) {
                let _ = tx.send(Frame::new(Control::Opaque, correlation, payload));
            }
        });
    }

    server.unregister(subscriber);
    writer.abort();
    debug!(subscriber, "connection closed");
}
