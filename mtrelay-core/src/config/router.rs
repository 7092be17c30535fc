use std::time::Duration;

/// Event router and downstream settings.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub batch_size: usize,
    /// Longest time the first event of a batch waits before a flush.
    pub max_latency: Duration,
    pub allowed_kinds: Vec<u16>,
    /// Events older than this at flush time are dropped.
    pub stale_after: Duration,
    pub fanout_enabled: bool,
    /// Per-connection downstream queue length.
    pub outbound_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_latency: Duration::from_millis(100),
            allowed_kinds: mtrelay_sdk::objects::event::EventKind::DEFAULT_ALLOWED.to_vec(),
            stale_after: Duration::from_secs(600),
            fanout_enabled: true,
            outbound_buffer: 1024,
        }
    }
}
