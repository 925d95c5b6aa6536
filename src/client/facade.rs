use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::client::connection::HostConnection;
use crate::client::events::ClientEvent;
use crate::client::router::RouterTable;
use crate::config::ClientConfig;
use crate::error::CacheError;
use crate::wire::command::{self, DelSpec, GetSpec, KeysSpec, SetSpec};
use crate::wire::frame::Control;

const MAX_RETRY_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// How a `put` entry expires. Mirrors `types::Policy` but keeps the façade
/// decoupled from the engine-side type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expiration {
    None,
    Absolute(DateTime<Utc>),
    Sliding(Duration),
    Interned,
}

/// Options accompanying a `put` (spec §4.2's `set` flags).
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub tag: Option<String>,
    pub notify_on_remove: bool,
}

/// The user-visible client API (C11): typed get/put/remove/tag operations
/// on byte values, with façade-level bounded retry and disconnect/
/// reconnect/expired events.
pub struct Client {
    router: RouterTable,
    config: ClientConfig,
    events_rx: Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
}

impl Client {
    pub fn connect(config: ClientConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let hosts: Vec<_> = config
            .cache_hosts
            .iter()
            .cloned()
            .map(|addr| {
                let conn = HostConnection::spawn(
                    addr.clone(),
                    config.reconnect_interval,
                    config.communication_timeout,
                    config.max_frame_size,
                    config.send_queue_bound,
                    events_tx.clone(),
                );
                (addr, conn)
            })
            .collect();

        let router = RouterTable::new(hosts, config.redundancy_layers);

        Client { router, config, events_rx: Mutex::new(events_rx) }
    }

    /// The next disconnect, reconnect, or expired-entry event, if any.
    pub async fn next_event(&self) -> Option<ClientEvent> {
        self.events_rx.lock().await.recv().await
    }

    fn validate_key(key: &str) -> Result<(), CacheError> {
        if key.is_empty() || key.contains(' ') {
            return Err(CacheError::InvalidArgument(format!("invalid key {key:?}")));
        }
        Ok(())
    }

    fn validate_tag(tag: &str) -> Result<(), CacheError> {
        if tag.is_empty() || tag.contains(' ') {
            return Err(CacheError::InvalidArgument(format!("invalid tag {tag:?}")));
        }
        Ok(())
    }

    fn validate_value(value: &[u8]) -> Result<(), CacheError> {
        if value.is_empty() {
            return Err(CacheError::InvalidArgument("value must not be empty".into()));
        }
        Ok(())
    }

    pub async fn put(&self, key: &str, value: Bytes, opts: PutOptions, expiration: Expiration) -> Result<(), CacheError> {
        Self::validate_key(key)?;
        Self::validate_value(&value)?;
        if let Some(tag) = &opts.tag {
            Self::validate_tag(tag)?;
        }

        let spec = SetSpec {
            pairs: vec![(key.to_string(), value.to_vec())],
            absolute: match &expiration {
                Expiration::Absolute(at) => Some(*at),
                _ => None,
            },
            sliding: match &expiration {
                Expiration::Sliding(ttl) => Some(*ttl),
                _ => None,
            },
            notify: opts.notify_on_remove,
            tag: opts.tag,
            interned: matches!(expiration, Expiration::Interned),
        };
        let payload = command::encode_set(&spec);

        self.retry(|| async {
            let bucket = self.router.bucket_for(key)?;
            bucket.write_all(Control::KeyValuePairs, payload.clone()).map_err(CacheError::from)
        })
        .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Self::validate_key(key)?;

        let reply = self
            .retry(|| async {
                let bucket = self.router.bucket_for(key)?;
                let member = bucket.read_next().ok_or(CacheError::NoHostsAvailable)?;
                let payload = command::encode_get(&GetSpec::Keys(vec![key.to_string()]));
                member.call(Control::KeyList, payload).await.map_err(CacheError::from)
            })
            .await?;

        let mut values = command::decode_value_list(&reply).map_err(|e| CacheError::Protocol(e.to_string()))?;
        Ok(values.pop().map(Bytes::from))
    }

    /// Batched get, grouped one call per bucket (spec §4.11). Falls back to
    /// per-key calls within a bucket only when the reply's value count is
    /// ambiguous against the requested keys (some were absent, and the
    /// wire reply carries no key names to disambiguate which).
    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, CacheError> {
        for key in keys {
            Self::validate_key(key)?;
        }

        let mut by_bucket: HashMap<usize, Vec<String>> = HashMap::new();
        for key in keys {
            let idx = self.router.bucket_index_for(key)?;
            by_bucket.entry(idx).or_default().push(key.clone());
        }

        let mut out = HashMap::new();
        for group in by_bucket.into_values() {
            out.extend(self.get_batch(&group).await?);
        }
        Ok(out)
    }

    async fn get_batch(&self, keys: &[String]) -> Result<HashMap<String, Bytes>, CacheError> {
        let Some(first) = keys.first() else { return Ok(HashMap::new()) };

        let reply = self
            .retry(|| async {
                let bucket = self.router.bucket_for(first)?;
                let member = bucket.read_next().ok_or(CacheError::NoHostsAvailable)?;
                let payload = command::encode_get(&GetSpec::Keys(keys.to_vec()));
                member.call(Control::KeyList, payload).await.map_err(CacheError::from)
            })
            .await?;

        let values = command::decode_value_list(&reply).map_err(|e| CacheError::Protocol(e.to_string()))?;

        if values.len() == keys.len() {
            return Ok(keys.iter().cloned().zip(values.into_iter().map(Bytes::from)).collect());
        }

        // Ambiguous: resolve key-by-key instead of guessing positions.
        let mut out = HashMap::new();
        for key in keys {
            if let Some(value) = self.get(key).await? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        Self::validate_key(key)?;
        let payload = command::encode_del(&DelSpec::Keys(vec![key.to_string()]));

        self.retry(|| async {
            let bucket = self.router.bucket_for(key)?;
            bucket.write_all(Control::KeyList, payload.clone()).map_err(CacheError::from)
        })
        .await
    }

    /// Fetches every key carrying `tag` matching `pattern` (`"*"` for all).
    /// Tag-scoped operations hash the tag, so they stay within one bucket.
    /// A tag-scoped `get` reply carries no key names (spec §4.2), so this
    /// first resolves the real keys via `keys -t` and then issues a plain
    /// `get` over them, the same way `get_batch` zips a value-list reply
    /// back onto the keys it asked for.
    pub async fn get_by_tag(&self, pattern: &str, tag: &str) -> Result<HashMap<String, Bytes>, CacheError> {
        Self::validate_tag(tag)?;

        let keys_payload = command::encode_keys(&KeysSpec { pattern: Some(pattern.to_string()), tags: vec![tag.to_string()] });
        let keys_reply = self
            .retry(|| async {
                let bucket = self.router.bucket_for_tag(tag)?;
                let member = bucket.read_next().ok_or(CacheError::NoHostsAvailable)?;
                member.call(Control::KeyList, keys_payload.clone()).await.map_err(CacheError::from)
            })
            .await?;
        let keys = command::decode_keylist(&keys_reply).map_err(|e| CacheError::Protocol(e.to_string()))?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let get_payload = command::encode_get(&GetSpec::Keys(keys.clone()));
        let values_reply = self
            .retry(|| async {
                let bucket = self.router.bucket_for_tag(tag)?;
                let member = bucket.read_next().ok_or(CacheError::NoHostsAvailable)?;
                member.call(Control::KeyList, get_payload.clone()).await.map_err(CacheError::from)
            })
            .await?;
        let values = command::decode_value_list(&values_reply).map_err(|e| CacheError::Protocol(e.to_string()))?;

        if values.len() == keys.len() {
            return Ok(keys.into_iter().zip(values.into_iter().map(Bytes::from)).collect());
        }

        // A key may have expired between the `keys -t` and `get` round-trips;
        // fall back to resolving each one individually rather than guessing
        // which position dropped out.
        let mut out = HashMap::new();
        for key in &keys {
            if let Some(value) = self.get(key).await? {
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    pub async fn remove_by_tag(&self, pattern: &str, tag: &str) -> Result<(), CacheError> {
        Self::validate_tag(tag)?;
        let payload = command::encode_del(&DelSpec::Tag { pattern: pattern.to_string(), tags: vec![tag.to_string()] });

        self.retry(|| async {
            let bucket = self.router.bucket_for_tag(tag)?;
            bucket.write_all(Control::KeyList, payload.clone()).map_err(CacheError::from)
        })
        .await
    }

    /// Retries `op` on `TransportError`, recomputing bucket assignments
    /// each attempt since the online set may have changed, with bounded
    /// exponential backoff (spec §4.11 adds the bound the source lacks).
    async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, CacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(CacheError::Transport(e)) => {
                    last_err = Some(CacheError::Transport(e));
                },
                Err(other) => return Err(other),
            }
            if attempt + 1 < MAX_RETRY_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_err.unwrap_or(CacheError::NoHostsAvailable))
    }
}
