use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::client::connection::HostConnection;
use crate::error::TransportError;
use crate::wire::frame::Control;

/// An ordered group of host connections holding the same data: one primary
/// plus `redundancyLayers` mirrors (C9). The same configured host list,
/// walked in the same order, produces the same bucket on every client.
pub struct Bucket {
    members: Vec<Arc<HostConnection>>,
    cursor: AtomicUsize,
}

impl Bucket {
    pub fn new(members: Vec<Arc<HostConnection>>) -> Self {
        Bucket { members, cursor: AtomicUsize::new(0) }
    }

    pub fn is_fully_offline(&self) -> bool {
        self.members.iter().all(|m| !m.is_online())
    }

    /// Picks the next online member round-robin for a read.
    pub fn read_next(&self) -> Option<Arc<HostConnection>> {
        let len = self.members.len();
        if len == 0 {
            return None;
        }
        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let member = &self.members[idx];
            if member.is_online() {
                return Some(member.clone());
            }
        }
        None
    }

    /// Fans `call` out to every online member; a call is a raw `send` since
    /// writes within a bucket don't individually wait for a reply — the
    /// façade treats the bucket's write as succeeded once any member
    /// accepted it onto its send queue.
    pub fn write_all(&self, control: Control, payload: Bytes) -> Result<(), TransportError> {
        let mut last_err = None;
        let mut any_ok = false;

        for member in &self.members {
            if !member.is_online() {
                continue;
            }
            match member.send(control, payload.clone()) {
                Ok(()) => any_ok = true,
                Err(e) => {
                    warn!(host = %member.addr, error = %e, "write fan-out failed on this member");
                    last_err = Some(e);
                },
            }
        }

        if any_ok {
            Ok(())
        } else {
            Err(last_err.unwrap_or(TransportError::Disconnected))
        }
    }

    pub fn members(&self) -> &[Arc<HostConnection>] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostAddr;
    use std::time::Duration;

    fn unconnected_member(port: u16) -> Arc<HostConnection> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        HostConnection::spawn(
            HostAddr { address: "127.0.0.1".into(), port },
            Duration::from_secs(60),
            Duration::from_millis(50),
            1024,
            8,
            tx,
        )
    }

    #[tokio::test]
    async fn read_next_returns_none_when_all_offline() {
        let bucket = Bucket::new(vec![unconnected_member(0), unconnected_member(0)]);
        assert!(bucket.is_fully_offline());
        assert!(bucket.read_next().is_none());
    }
}
