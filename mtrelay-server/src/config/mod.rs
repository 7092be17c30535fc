//! Configuration module for mtrelay-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables. Also handles control token hashing.

pub mod file;

use crate::config::file::{FileConfig, LogFormat, StorageBackend};
use mtrelay_core::config::{
    AdminConfig, CreditPolicy, DedupConfig, RelayPoolConfig, RouterConfig, SettlementConfig,
    SharedConfig,
};
use mtrelay_core::processors::parse_source_url;
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("password hashing error: {0}")]
    HashError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Process-level settings that are fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub log_format: LogFormat,
    pub platform_pubkey: Option<String>,
    pub backend: StorageBackend,
    pub db_max_connections: u32,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerSettings,
    pub admin: AdminConfig,
    pub relay: RelayPoolConfig,
    pub dedup: DedupConfig,
    pub router: RouterConfig,
    /// `None` when no explorer is configured.
    pub settlement: Option<SettlementConfig>,
    /// `None` when credit issuance is disabled.
    pub credit: Option<CreditPolicy>,
    /// The plaintext token was hashed and written back on this load.
    pub token_rewritten: bool,
}

impl LoadedConfig {
    /// The sections that SIGHUP can swap at runtime.
    pub fn shared(&self) -> SharedConfig {
        SharedConfig::new(self.admin.clone(), self.credit.clone())
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Hash the control token if it's plaintext (and rewrite the file)
    /// 5. Build the runtime configuration
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        let token_rewritten = match &file_config.admin.token {
            Some(token) if !file_config.is_admin_token_hashed() => {
                let hash = hash_token(token)?;
                file_config.admin.token = Some(hash);
                self.rewrite_config(&file_config)?;
                true
            }
            _ => false,
        };

        let mut loaded = build_loaded_config(file_config)?;
        loaded.token_rewritten = token_rewritten;
        Ok(loaded)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn rewrite_config(&self, config: &FileConfig) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(config)?;

        // Write atomically: write to temp file, then rename
        let temp_path = self.config_path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml_string)?;
        std::fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

fn hash_token(plaintext: &str) -> Result<String, ConfigError> {
    use argon2::{
        Argon2, PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ConfigError::HashError(e.to_string()))
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Validate the file and convert it into runtime configuration.
fn build_loaded_config(file: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let relay = &file.relay;
    if relay.max_connections == 0 {
        return Err(invalid("relay.max_connections must be at least 1"));
    }
    if relay.bootstrap.len() > relay.max_connections {
        return Err(invalid(format!(
            "{} bootstrap relays exceed relay.max_connections = {}",
            relay.bootstrap.len(),
            relay.max_connections
        )));
    }
    let bootstrap = relay
        .bootstrap
        .iter()
        .map(|raw| parse_source_url(raw).map_err(|e| invalid(e.to_string())))
        .collect::<Result<Vec<Url>, _>>()?;
    if relay.unhealthy_after == 0 {
        return Err(invalid("relay.unhealthy_after must be at least 1"));
    }
    if relay.health_check_interval_secs == 0 {
        return Err(invalid("relay.health_check_interval_secs must be positive"));
    }

    if file.filters.allowed_kinds.is_empty() {
        return Err(invalid("filters.allowed_kinds must not be empty"));
    }

    let dedup = &file.deduplication;
    if !(dedup.bloom_fp_rate > 0.0 && dedup.bloom_fp_rate < 1.0) {
        return Err(invalid("deduplication.bloom_fp_rate must be within (0, 1)"));
    }
    if dedup.bloom_capacity == 0 || dedup.lru_size == 0 {
        return Err(invalid(
            "deduplication.bloom_capacity and lru_size must be positive",
        ));
    }
    if dedup.sweep_interval_secs == 0 {
        return Err(invalid("deduplication.sweep_interval_secs must be positive"));
    }

    let output = &file.output;
    if output.batch_size == 0 || output.outbound_buffer == 0 {
        return Err(invalid("output.batch_size and outbound_buffer must be positive"));
    }

    let settlement = match &file.settlement.explorer_base {
        None => None,
        Some(raw) => {
            let explorer_base = Url::parse(raw)
                .map_err(|e| invalid(format!("settlement.explorer_base: {e}")))?;
            if !matches!(explorer_base.scheme(), "http" | "https") {
                return Err(invalid("settlement.explorer_base must be http or https"));
            }
            if file.settlement.max_attempts < 1 || file.settlement.batch_limit < 1 {
                return Err(invalid(
                    "settlement.max_attempts and batch_limit must be at least 1",
                ));
            }
            if file.settlement.poll_interval_secs == 0 {
                return Err(invalid("settlement.poll_interval_secs must be positive"));
            }
            Some(SettlementConfig {
                explorer_base,
                poll_interval: secs(file.settlement.poll_interval_secs),
                batch_limit: file.settlement.batch_limit,
                max_attempts: file.settlement.max_attempts,
                request_timeout: secs(file.settlement.request_timeout_secs),
            })
        }
    };

    let credit = match &file.settlement.credit {
        Some(credit) if credit.enable => {
            let rates = [
                credit.leader_rate,
                credit.follower_rate,
                credit.min_credit,
                credit.profit_multiplier,
                credit.test_multiplier,
            ];
            if rates.iter().any(|rate| *rate < Decimal::ZERO) {
                return Err(invalid("settlement.credit values must not be negative"));
            }
            Some(CreditPolicy {
                leader_rate: credit.leader_rate,
                follower_rate: credit.follower_rate,
                min_credit: credit.min_credit,
                profit_multiplier: credit.profit_multiplier,
                test_multiplier: credit.test_multiplier,
            })
        }
        _ => None,
    };

    Ok(LoadedConfig {
        server: ServerSettings {
            listen: file.server.listen,
            log_format: file.server.log_format,
            platform_pubkey: file.server.platform_pubkey.clone(),
            backend: file.storage.backend,
            db_max_connections: file.storage.max_connections,
        },
        admin: AdminConfig::new(file.admin.token.clone()),
        relay: RelayPoolConfig {
            bootstrap,
            max_connections: relay.max_connections,
            health_check_interval: secs(relay.health_check_interval_secs),
            probe_timeout: secs(relay.probe_timeout_secs),
            connect_timeout: secs(relay.connect_timeout_secs),
            max_backoff: secs(relay.max_backoff_secs),
            unhealthy_after: relay.unhealthy_after,
            allowed_kinds: file.filters.allowed_kinds.clone(),
            verify_ids: relay.verify_ids,
        },
        dedup: DedupConfig {
            bloom_capacity: dedup.bloom_capacity,
            bloom_fp_rate: dedup.bloom_fp_rate,
            lru_size: dedup.lru_size,
            retention: secs(dedup.retention_secs),
            max_entries: dedup.max_entries,
            sweep_interval: secs(dedup.sweep_interval_secs),
            warm_limit: dedup.warm_limit,
        },
        router: RouterConfig {
            batch_size: output.batch_size,
            max_latency: Duration::from_millis(output.max_latency_ms),
            allowed_kinds: file.filters.allowed_kinds.clone(),
            stale_after: secs(file.filters.stale_after_secs),
            fanout_enabled: output.fanout_enabled,
            outbound_buffer: output.outbound_buffer,
        },
        settlement,
        credit,
        token_rewritten: false,
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
