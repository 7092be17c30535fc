//! Runtime configuration types for mtrelay.
//!
//! These are the validated values the core components run with. Loading
//! and validating the TOML file is the server crate's job.

mod admin;
mod config_store;
mod dedup;
mod relay;
mod router;
mod settlement;

pub use admin::AdminConfig;
pub use config_store::ConfigStore;
pub use dedup::DedupConfig;
pub use relay::RelayPoolConfig;
pub use router::RouterConfig;
pub use settlement::{CreditPolicy, SettlementConfig};

/// Configuration sections that can change at runtime (on SIGHUP).
#[derive(Clone)]
pub struct SharedConfig {
    /// Control token verification.
    pub admin: ConfigStore<AdminConfig>,
    /// `None` disables credit issuance. Transitions still happen.
    pub credit: ConfigStore<Option<CreditPolicy>>,
}

impl SharedConfig {
    pub fn new(admin: AdminConfig, credit: Option<CreditPolicy>) -> Self {
        Self {
            admin: ConfigStore::new(admin),
            credit: ConfigStore::new(credit),
        }
    }
}
