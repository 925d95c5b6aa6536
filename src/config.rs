use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One configured cache host (spec §6: "cache-hosts list — each entry
/// `{address, port}`").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAddr {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Client-side configuration (§6). The serializer and logger plugins named
/// in the spec are external collaborators and are not modeled as fields
/// here — callers supply a serializer directly to the façade, and logging
/// goes through `tracing`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub cache_hosts: Vec<HostAddr>,
    #[serde(with = "duration_secs")]
    pub reconnect_interval: Duration,
    pub redundancy_layers: u32,
    #[serde(with = "duration_millis")]
    pub communication_timeout: Duration,
    pub max_frame_size: u32,
    pub send_queue_bound: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            cache_hosts: Vec::new(),
            reconnect_interval: Duration::from_secs(5),
            redundancy_layers: 0,
            communication_timeout: Duration::from_millis(2_000),
            max_frame_size: 16 * 1024 * 1024,
            send_queue_bound: 1_024,
        }
    }
}

/// Host-side configuration: listen address, persistence directory, and the
/// memory-pressure limit (§4.6, §6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub data_dir: Option<std::path::PathBuf>,
    pub memory_limit_pct: f64,
    pub max_frame_size: u32,
    #[serde(with = "duration_secs")]
    pub expiration_sweep_interval: Duration,
    #[serde(with = "duration_secs")]
    pub memory_watch_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 33_331,
            data_dir: None,
            memory_limit_pct: 0.0,
            max_frame_size: 16 * 1024 * 1024,
            expiration_sweep_interval: Duration::from_secs(2),
            memory_watch_interval: Duration::from_secs(5),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_has_sane_defaults() {
        let cfg = ClientConfig::default();
        assert!(cfg.cache_hosts.is_empty());
        assert_eq!(cfg.redundancy_layers, 0);
    }
}
