use std::time::Duration;

/// Tiered deduplication and retention settings.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Expected ids per bloom generation.
    pub bloom_capacity: usize,
    pub bloom_fp_rate: f64,
    pub lru_size: usize,
    /// Durable records older than this are swept.
    pub retention: Duration,
    /// Durable record count kept after the time sweep.
    pub max_entries: u64,
    pub sweep_interval: Duration,
    /// Most recent durable ids preloaded into the volatile tiers at startup.
    pub warm_limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            bloom_capacity: 1_000_000,
            bloom_fp_rate: 0.001,
            lru_size: 100_000,
            retention: Duration::from_secs(7 * 24 * 3600),
            max_entries: 10_000_000,
            sweep_interval: Duration::from_secs(600),
            warm_limit: 100_000,
        }
    }
}
