use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::client::events::ClientEvent;
use crate::config::HostAddr;
use crate::error::TransportError;
use crate::wire::command;
use crate::wire::frame::{Control, Frame};

enum Outbound {
    Send(Frame),
    Call { frame: Frame, reply: oneshot::Sender<Result<Bytes, TransportError>> },
    /// Drops a timed-out waiter from the pending map without touching the
    /// connection (spec §5: a timeout must not disconnect the channel).
    CancelWaiter(u32),
}

/// A single duplex TCP channel to one cache host (C8). The connection
/// itself is driven by a background task; this handle only enqueues work
/// and exposes the best-known online/offline state for the bucket layer.
pub struct HostConnection {
    pub addr: HostAddr,
    online: Arc<AtomicBool>,
    next_correlation: AtomicU32,
    outbound_tx: mpsc::Sender<Outbound>,
    timeout: Duration,
}

impl HostConnection {
    pub fn spawn(
        addr: HostAddr,
        reconnect_interval: Duration,
        communication_timeout: Duration,
        max_frame_size: u32,
        send_queue_bound: usize,
        events_tx: mpsc::UnboundedSender<ClientEvent>,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(send_queue_bound);
        let online = Arc::new(AtomicBool::new(false));

        tokio::spawn(driver_loop(
            addr.clone(),
            reconnect_interval,
            max_frame_size,
            outbound_rx,
            online.clone(),
            events_tx,
        ));

        Arc::new(HostConnection {
            addr,
            online,
            next_correlation: AtomicU32::new(1),
            outbound_tx,
            timeout: communication_timeout,
        })
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    fn enqueue_error(err: mpsc::error::TrySendError<Outbound>) -> TransportError {
        match err {
            mpsc::error::TrySendError::Full(_) => TransportError::Busy,
            mpsc::error::TrySendError::Closed(_) => TransportError::Disconnected,
        }
    }

    /// Enqueues `payload` for send without waiting for a reply. Fails fast
    /// with `Busy` if the send queue is full, `Disconnected` if the driver
    /// task has exited.
    pub fn send(&self, control: Control, payload: Bytes) -> Result<(), TransportError> {
        let frame = Frame::new(control, 0, payload);
        self.outbound_tx.try_send(Outbound::Send(frame)).map_err(Self::enqueue_error)
    }

    /// Sends `payload` and waits for the correlated reply, or `Timeout`
    /// after the configured communication timeout.
    pub async fn call(&self, control: Control, payload: Bytes) -> Result<Bytes, TransportError> {
        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed).max(1);
        let (reply_tx, reply_rx) = oneshot::channel();
        let frame = Frame::new(control, correlation, payload);

        self.outbound_tx
            .try_send(Outbound::Call { frame, reply: reply_tx })
            .map_err(Self::enqueue_error)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                let _ = self.outbound_tx.try_send(Outbound::CancelWaiter(correlation));
                Err(TransportError::Timeout)
            },
        }
    }
}

async fn driver_loop(
    addr: HostAddr,
    reconnect_interval: Duration,
    max_frame_size: u32,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    online: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut pending: HashMap<u32, oneshot::Sender<Result<Bytes, TransportError>>> = HashMap::new();

    loop {
        let stream = match TcpStream::connect((addr.address.as_str(), addr.port)).await {
            Ok(s) => s,
            Err(error) => {
                debug!(%error, host = %addr, "connect failed, retrying");
                tokio::time::sleep(reconnect_interval).await;
                continue;
            },
        };
        let _ = stream.set_nodelay(true);

        online.store(true, Ordering::Relaxed);
        let _ = events_tx.send(ClientEvent::Reconnected(addr.clone()));

        let framed = crate::wire::framed(stream, max_frame_size);
        let (mut sink, mut stream) = framed.split();

        'session: loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    let Some(outbound) = outbound else { return };
                    let frame = match outbound {
                        Outbound::Send(frame) => frame,
                        Outbound::Call { frame, reply } => {
                            pending.insert(frame.correlation, reply);
                            frame
                        },
                        Outbound::CancelWaiter(correlation) => {
                            pending.remove(&correlation);
                            continue;
                        },
                    };
                    if sink.send(frame).await.is_err() {
                        break 'session;
                    }
                },
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(frame)) if frame.correlation == 0 => {
                            if let Ok(key) = command::decode_expire_notification(&frame.payload) {
                                let _ = events_tx.send(ClientEvent::Expired(key));
                            }
                        },
                        Some(Ok(frame)) => {
                            if let Some(reply) = pending.remove(&frame.correlation) {
                                let _ = reply.send(Ok(frame.payload));
                            }
                        },
                        Some(Err(error)) => {
                            warn!(%error, host = %addr, "frame decode error");
                            break 'session;
                        },
                        None => break 'session,
                    }
                },
            }
        }

        online.store(false, Ordering::Relaxed);
        let _ = events_tx.send(ClientEvent::Disconnected(addr.clone()));
        for (_, reply) in pending.drain() {
            let _ = reply.send(Err(TransportError::Disconnected));
        }

        tokio::time::sleep(reconnect_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn call_times_out_without_a_live_connection() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let conn = HostConnection::spawn(
            HostAddr { address: "127.0.0.1".into(), port: 0 },
            Duration::from_secs(60),
            Duration::from_millis(50),
            1024,
            8,
            events_tx,
        );
        // Port 0 never accepts, so the driver never sends the queued call
        // and the `call()` deadline is what resolves this.
        let result = conn.call(Control::Opaque, Bytes::from_static(b"get k")).await;
        assert!(matches!(result, Err(TransportError::Timeout)) || matches!(result, Err(TransportError::Disconnected)));
    }
}
