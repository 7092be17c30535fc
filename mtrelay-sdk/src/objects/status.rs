//! Health, status and metrics bodies.

use serde::{Deserialize, Serialize};

use super::relays::SourceInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Sizes of the deduplication tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Approximate number of ids inserted into the live bloom generations.
    pub bloom_filter_size: u64,
    pub lru_cache_size: u64,
    pub durable_entry_count: u64,
}

/// `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active_connections: usize,
    pub connections: Vec<SourceInfo>,
    pub deduplication_engine: DedupStats,
}

/// `GET /api/metrics/summary`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub events_received_total: u64,
    pub events_processed_total: u64,
    pub duplicates_filtered_total: u64,
    pub events_filtered_total: u64,
    pub malformed_frames_total: u64,
    pub batches_flushed_total: u64,
    pub fanout_messages_total: u64,
    pub sink_failures_total: u64,
    pub downstream_dropped_total: u64,
    pub active_connections: u64,
    pub downstream_connections: u64,
    pub trades_settled_total: u64,
}
