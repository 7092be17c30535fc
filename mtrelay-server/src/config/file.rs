//! TOML file configuration structures.
//!
//! These structs directly map to the `mtrelay.toml` file format. Every
//! section is optional and falls back to the defaults below.

use mtrelay_sdk::objects::event::EventKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub relay: RelayConfig,
    pub filters: FiltersConfig,
    pub deduplication: DeduplicationConfig,
    pub output: OutputConfig,
    pub storage: StorageConfig,
    pub settlement: SettlementConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub log_format: LogFormat,
    /// Returned to bots on registration.
    pub platform_pubkey: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            log_format: LogFormat::Text,
            platform_pubkey: None,
        }
    }
}

/// Control surface token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// If this is plaintext (doesn't start with `$argon2`), it will be
    /// hashed and the config file will be rewritten. Absent means the
    /// guarded routes are open.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// `ws://` or `wss://` sources dialed at startup.
    pub bootstrap: Vec<String>,
    pub max_connections: usize,
    pub health_check_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_backoff_secs: u64,
    pub unhealthy_after: u32,
    pub verify_ids: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            max_connections: 64,
            health_check_interval_secs: 30,
            probe_timeout_secs: 90,
            connect_timeout_secs: 10,
            max_backoff_secs: 300,
            unhealthy_after: 5,
            verify_ids: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub allowed_kinds: Vec<u16>,
    pub stale_after_secs: u64,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            allowed_kinds: EventKind::DEFAULT_ALLOWED.to_vec(),
            stale_after_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    pub bloom_capacity: usize,
    pub bloom_fp_rate: f64,
    pub lru_size: usize,
    pub retention_secs: u64,
    pub max_entries: u64,
    pub sweep_interval_secs: u64,
    pub warm_limit: usize,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            bloom_capacity: 1_000_000,
            bloom_fp_rate: 0.001,
            lru_size: 100_000,
            retention_secs: 7 * 24 * 3600,
            max_entries: 10_000_000,
            sweep_interval_secs: 600,
            warm_limit: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub batch_size: usize,
    pub max_latency_ms: u64,
    pub fanout_enabled: bool,
    /// Per-connection downstream queue length.
    pub outbound_buffer: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_latency_ms: 100,
            fanout_enabled: true,
            outbound_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Postgres pool size.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// No verifier polling runs without it.
    pub explorer_base: Option<String>,
    pub poll_interval_secs: u64,
    pub batch_limit: i64,
    pub max_attempts: i32,
    pub request_timeout_secs: u64,
    pub credit: Option<CreditConfig>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            explorer_base: None,
            poll_interval_secs: 30,
            batch_limit: 50,
            max_attempts: 20,
            request_timeout_secs: 10,
            credit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    pub enable: bool,
    pub leader_rate: Decimal,
    pub follower_rate: Decimal,
    pub min_credit: Decimal,
    pub profit_multiplier: Decimal,
    pub test_multiplier: Decimal,
}

impl Default for CreditConfig {
    fn default() -> Self {
        let policy = mtrelay_core::config::CreditPolicy::default();
        Self {
            enable: true,
            leader_rate: policy.leader_rate,
            follower_rate: policy.follower_rate,
            min_credit: policy.min_credit,
            profit_multiplier: policy.profit_multiplier,
            test_multiplier: policy.test_multiplier,
        }
    }
}

impl FileConfig {
    /// Check if the control token is already hashed (argon2 format).
    pub fn is_admin_token_hashed(&self) -> bool {
        self.admin
            .token
            .as_deref()
            .is_none_or(|token| token.starts_with("$argon2"))
    }
}
