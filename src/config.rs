//! `fragd.toml` configuration for fragd.

use anyhow::{Context, Result};
use frag_ingest::{ServiceConfig, StoreConfig, DEFAULT_ACK, DEFAULT_MAX_FRAGMENTS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub stats: StatsSection,
}

/// UDP socket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address and port to receive fragments on.
    #[serde(default = "ListenConfig::default_addr")]
    pub addr: String,
    /// Kernel receive buffer in KB (0 = OS default).
    #[serde(default = "ListenConfig::default_recv_buffer_kb")]
    pub recv_buffer_kb: usize,
}

impl ListenConfig {
    fn default_addr() -> String { "0.0.0.0:3000".into() }
    fn default_recv_buffer_kb() -> usize { 4096 }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            recv_buffer_kb: Self::default_recv_buffer_kb(),
        }
    }
}

/// Partial-message retention limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSection {
    /// Drop a partial message this many ms after its first fragment (0 = never).
    #[serde(default = "StoreSection::default_ttl_ms")]
    pub ttl_ms: u64,
    /// How often the TTL sweep runs.
    #[serde(default = "StoreSection::default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Maximum partial messages held at once; the least recently touched is
    /// evicted to admit a new one (0 = unbounded).
    #[serde(default = "StoreSection::default_max_pending")]
    pub max_pending: usize,
    /// Largest `total` a fragment may declare.
    #[serde(default = "StoreSection::default_max_fragments")]
    pub max_fragments: u32,
}

impl StoreSection {
    fn default_ttl_ms() -> u64 { 30_000 }
    fn default_sweep_interval_ms() -> u64 { 1_000 }
    fn default_max_pending() -> usize { 65_536 }
    fn default_max_fragments() -> u32 { DEFAULT_MAX_FRAGMENTS }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            ttl_ms: Self::default_ttl_ms(),
            sweep_interval_ms: Self::default_sweep_interval_ms(),
            max_pending: Self::default_max_pending(),
            max_fragments: Self::default_max_fragments(),
        }
    }
}

/// Worker and acknowledgment settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestSection {
    /// Number of decode/dispatch threads sharing the store.
    #[serde(default = "IngestSection::default_workers")]
    pub workers: usize,
    /// Reply to each stored fragment with `ack_message`.
    #[serde(default = "IngestSection::default_ack")]
    pub ack: bool,
    #[serde(default = "IngestSection::default_ack_message")]
    pub ack_message: String,
    /// Receiver→worker queue depth; datagrams beyond it are dropped and counted.
    #[serde(default = "IngestSection::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl IngestSection {
    fn default_workers() -> usize { 1 }
    fn default_ack() -> bool { true }
    fn default_ack_message() -> String { DEFAULT_ACK.into() }
    fn default_channel_capacity() -> usize { 4096 }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            ack: Self::default_ack(),
            ack_message: Self::default_ack_message(),
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

/// Periodic metrics log written by `fragd run`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatsSection {
    /// JSONL file to append snapshots to. Omit to disable.
    #[serde(default)]
    pub log_path: Option<String>,
    #[serde(default = "StatsSection::default_interval_secs")]
    pub interval_secs: u64,
}

impl StatsSection {
    fn default_interval_secs() -> u64 { 10 }
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            log_path: None,
            interval_secs: Self::default_interval_secs(),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// Example config printed by `fragd init`.
    pub fn default_example() -> Self {
        Self {
            stats: StatsSection {
                log_path: Some(crate::run::DEFAULT_LOG.into()),
                ..StatsSection::default()
            },
            ..Self::default()
        }
    }

    /// Translate into the library's runtime configuration.
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let listen_addr: SocketAddr = self
            .listen
            .addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.listen.addr))?;
        anyhow::ensure!(self.store.max_fragments > 0, "store.max_fragments must be at least 1");

        Ok(ServiceConfig {
            listen_addr,
            recv_buffer_bytes: self.listen.recv_buffer_kb * 1024,
            workers: self.ingest.workers.max(1),
            ack: self.ingest.ack.then(|| self.ingest.ack_message.clone()),
            channel_capacity: self.ingest.channel_capacity,
            sweep_interval: Duration::from_millis(self.store.sweep_interval_ms.max(1)),
            store: StoreConfig {
                ttl: (self.store.ttl_ms > 0).then(|| Duration::from_millis(self.store.ttl_ms)),
                max_pending: self.store.max_pending,
                max_fragments: self.store.max_fragments,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: DaemonConfig = toml::from_str("").unwrap();
        let svc = cfg.service_config().unwrap();
        assert_eq!(svc.listen_addr.port(), 3000);
        assert_eq!(svc.ack.as_deref(), Some(DEFAULT_ACK));
        assert_eq!(svc.store.ttl, Some(Duration::from_secs(30)));
        assert_eq!(svc.workers, 1);
    }

    #[test]
    fn test_partial_sections() {
        let cfg: DaemonConfig = toml::from_str(
            r#"
            [listen]
            addr = "127.0.0.1:4000"

            [store]
            ttl_ms = 0

            [ingest]
            workers = 4
            ack = false
            "#,
        )
        .unwrap();
        let svc = cfg.service_config().unwrap();
        assert_eq!(svc.listen_addr, "127.0.0.1:4000".parse().unwrap());
        assert!(svc.store.ttl.is_none());
        assert_eq!(svc.store.max_pending, 65_536);
        assert_eq!(svc.workers, 4);
        assert!(svc.ack.is_none());
    }

    #[test]
    fn test_invalid_addr() {
        let cfg: DaemonConfig = toml::from_str("[listen]\naddr = \"nowhere\"\n").unwrap();
        assert!(cfg.service_config().is_err());
    }

    #[test]
    fn test_example_round_trips() {
        let text = toml::to_string_pretty(&DaemonConfig::default_example()).unwrap();
        let back: DaemonConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.stats.log_path.as_deref(), Some(crate::run::DEFAULT_LOG));
    }
}
