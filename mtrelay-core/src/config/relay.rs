use std::time::Duration;
use url::Url;

/// Ingest pool settings.
#[derive(Debug, Clone)]
pub struct RelayPoolConfig {
    /// Sources dialed at startup.
    pub bootstrap: Vec<Url>,
    pub max_connections: usize,
    pub health_check_interval: Duration,
    /// A probe fails when no frame arrived within this window.
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_backoff: Duration,
    /// Consecutive failures after which a source is reported unhealthy.
    pub unhealthy_after: u32,
    pub allowed_kinds: Vec<u16>,
    /// Drop events whose id does not match their content.
    pub verify_ids: bool,
}

impl Default for RelayPoolConfig {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            max_connections: 64,
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
            max_backoff: Duration::from_secs(300),
            unhealthy_after: 5,
            allowed_kinds: mtrelay_sdk::objects::event::EventKind::DEFAULT_ALLOWED.to_vec(),
            verify_ids: true,
        }
    }
}
