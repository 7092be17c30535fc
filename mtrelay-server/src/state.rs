//! Application state shared across all request handlers.

use mtrelay_core::config::SharedConfig;
use mtrelay_core::dedup::DedupEngine;
use mtrelay_core::hub::StreamHub;
use mtrelay_core::metrics::RelayMetrics;
use mtrelay_core::processors::RelayPool;
use mtrelay_core::settlement::SettlementService;
use mtrelay_core::storage::Stores;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    /// Sections that can be reloaded via SIGHUP.
    pub config: SharedConfig,
    pub settlement: SettlementService,
    pub dedup: Arc<DedupEngine>,
    pub relays: RelayPool,
    pub hub: StreamHub,
    pub metrics: Arc<RelayMetrics>,
    /// Renders the installed recorder for `GET /metrics`.
    pub prometheus: PrometheusHandle,
    pub platform_pubkey: Option<Arc<str>>,
    /// `router.fanout_enabled`. When off, `/ws/fanout` is not served.
    pub fanout_enabled: bool,
}
