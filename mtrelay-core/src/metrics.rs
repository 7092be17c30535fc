//! Process-wide pipeline counters.
//!
//! Every update goes through the [`metrics`] facade, which the Prometheus
//! exporter renders on `GET /metrics`. Each metric also keeps its own running
//! value so the JSON summary can be served without a recorder installed.

use metrics::Unit;
use mtrelay_sdk::objects::status::MetricsSummary;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
}

/// One named series.
#[derive(Debug)]
pub struct Metric {
    name: &'static str,
    description: &'static str,
    kind: MetricKind,
    value: AtomicU64,
}

impl Metric {
    const fn counter(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: MetricKind::Counter,
            value: AtomicU64::new(0),
        }
    }

    const fn gauge(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind: MetricKind::Gauge,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn describe(&self) {
        match self.kind {
            MetricKind::Counter => metrics::describe_counter!(self.name, Unit::Count, self.description),
            MetricKind::Gauge => metrics::describe_gauge!(self.name, Unit::Count, self.description),
        }
    }
}

#[derive(Debug)]
pub struct RelayMetrics {
    pub events_received: Metric,
    pub events_processed: Metric,
    pub duplicates_filtered: Metric,
    /// Dropped by kind or staleness checks.
    pub events_filtered: Metric,
    pub malformed_frames: Metric,
    pub batches_flushed: Metric,
    pub fanout_messages: Metric,
    pub sink_failures: Metric,
    pub downstream_dropped: Metric,
    pub active_connections: Metric,
    pub downstream_connections: Metric,
    pub trades_settled: Metric,
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self {
            events_received: Metric::counter(
                "mtrelay_events_received_total",
                "EVENT frames read from upstream relays.",
            ),
            events_processed: Metric::counter(
                "mtrelay_events_processed_total",
                "Events published to the global feed.",
            ),
            duplicates_filtered: Metric::counter(
                "mtrelay_duplicates_filtered_total",
                "Events rejected by the deduplication engine.",
            ),
            events_filtered: Metric::counter(
                "mtrelay_events_filtered_total",
                "Events dropped for their kind or age.",
            ),
            malformed_frames: Metric::counter(
                "mtrelay_malformed_frames_total",
                "Upstream frames that failed to parse or carried a forged id.",
            ),
            batches_flushed: Metric::counter(
                "mtrelay_batches_flushed_total",
                "Router batches flushed.",
            ),
            fanout_messages: Metric::counter(
                "mtrelay_fanout_messages_total",
                "Sealed payloads handed to follower streams.",
            ),
            sink_failures: Metric::counter(
                "mtrelay_sink_failures_total",
                "Batches the fanout worker could not accept.",
            ),
            downstream_dropped: Metric::counter(
                "mtrelay_downstream_dropped_total",
                "Frames skipped by slow downstream readers.",
            ),
            active_connections: Metric::gauge(
                "mtrelay_active_connections",
                "Upstream relays currently subscribed.",
            ),
            downstream_connections: Metric::gauge(
                "mtrelay_downstream_connections",
                "Open downstream websocket streams.",
            ),
            trades_settled: Metric::counter(
                "mtrelay_trades_settled_total",
                "Trades moved to a terminal status.",
            ),
        }
    }
}

impl RelayMetrics {
    pub fn incr(metric: &Metric) {
        Self::add(metric, 1);
    }

    pub fn add(metric: &Metric, n: u64) {
        if n == 0 {
            return;
        }
        metric.value.fetch_add(n, Ordering::Relaxed);
        match metric.kind {
            MetricKind::Counter => metrics::counter!(metric.name, n),
            MetricKind::Gauge => metrics::increment_gauge!(metric.name, n as f64),
        }
    }

    /// Saturating decrement for gauges.
    pub fn decr(metric: &Metric) {
        let decremented = metric
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_ok();
        if decremented && metric.kind == MetricKind::Gauge {
            metrics::decrement_gauge!(metric.name, 1.0);
        }
    }

    fn all(&self) -> [&Metric; 12] {
        [
            &self.events_received,
            &self.events_processed,
            &self.duplicates_filtered,
            &self.events_filtered,
            &self.malformed_frames,
            &self.batches_flushed,
            &self.fanout_messages,
            &self.sink_failures,
            &self.downstream_dropped,
            &self.active_connections,
            &self.downstream_connections,
            &self.trades_settled,
        ]
    }

    /// Register help text with the installed recorder. Call once at startup.
    pub fn describe(&self) {
        for metric in self.all() {
            metric.describe();
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            events_received_total: self.events_received.get(),
            events_processed_total: self.events_processed.get(),
            duplicates_filtered_total: self.duplicates_filtered.get(),
            events_filtered_total: self.events_filtered.get(),
            malformed_frames_total: self.malformed_frames.get(),
            batches_flushed_total: self.batches_flushed.get(),
            fanout_messages_total: self.fanout_messages.get(),
            sink_failures_total: self.sink_failures.get(),
            downstream_dropped_total: self.downstream_dropped.get(),
            active_connections: self.active_connections.get(),
            downstream_connections: self.downstream_connections.get(),
            trades_settled_total: self.trades_settled.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_gauge_never_underflows() {
        let metrics = RelayMetrics::default();
        RelayMetrics::decr(&metrics.active_connections);
        RelayMetrics::incr(&metrics.active_connections);
        RelayMetrics::add(&metrics.events_received, 3);
        let summary = metrics.summary();
        assert_eq!(summary.active_connections, 1);
        assert_eq!(summary.events_received_total, 3);
    }

    #[test]
    fn test_series_names_are_unique_and_prefixed() {
        let metrics = RelayMetrics::default();
        let names: HashSet<_> = metrics.all().iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), 12);
        assert!(names.iter().all(|name| name.starts_with("mtrelay_")));
        for metric in metrics.all() {
            let counter = metric.kind == MetricKind::Counter;
            assert_eq!(counter, metric.name().ends_with("_total"), "{}", metric.name());
        }
    }
}
