//! EventRouter processor.
//!
//! The EventRouter is responsible for:
//! - Receiving `IngestedEvent` from the relay pool
//! - Admitting each event through the dedup engine
//! - Batching accepted events, flushing on `batch_size` or `max_latency`
//! - Re-checking kind and staleness at flush time
//! - Publishing the batch to the global feed and emitting `FanoutJob`

use crate::config::RouterConfig;
use crate::dedup::{Admission, DedupEngine};
use crate::events::{FanoutJob, FanoutJobSender, IngestReceiver, IngestedEvent};
use crate::hub::StreamHub;
use crate::metrics::RelayMetrics;
use crate::utils::clock::unix_now;
use mtrelay_sdk::objects::event::Event;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct EventRouter {
    config: RouterConfig,
    allowed_kinds: HashSet<u16>,
    dedup: Arc<DedupEngine>,
    hub: StreamHub,
    /// `None` when fanout is disabled.
    fanout_tx: Option<FanoutJobSender>,
    metrics: Arc<RelayMetrics>,
    ingest_rx: IngestReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventRouter {
    pub fn new(
        config: RouterConfig,
        dedup: Arc<DedupEngine>,
        hub: StreamHub,
        fanout_tx: Option<FanoutJobSender>,
        metrics: Arc<RelayMetrics>,
        ingest_rx: IngestReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let allowed_kinds = config.allowed_kinds.iter().copied().collect();
        let fanout_tx = fanout_tx.filter(|_| config.fanout_enabled);
        Self {
            config,
            allowed_kinds,
            dedup,
            hub,
            fanout_tx,
            metrics,
            ingest_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            batch_size = self.config.batch_size,
            max_latency_ms = self.config.max_latency.as_millis() as u64,
            "EventRouter started"
        );

        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<Arc<Event>> = Vec::with_capacity(batch_size);
        // Armed by the first event of a batch.
        let mut deadline: Option<Instant> = None;

        loop {
            let flush_at = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("EventRouter received shutdown signal");
                        self.drain(&mut batch, batch_size).await;
                        break;
                    }
                }

                _ = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                    self.flush(&mut batch);
                    deadline = None;
                }

                ingested = self.ingest_rx.recv() => {
                    let Some(ingested) = ingested else {
                        info!("Ingest channel closed");
                        self.flush(&mut batch);
                        break;
                    };
                    if !self.admit(&ingested).await {
                        continue;
                    }
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + self.config.max_latency);
                    }
                    batch.push(ingested.event);
                    if batch.len() >= batch_size {
                        self.flush(&mut batch);
                        deadline = None;
                    }
                }
            }
        }

        info!("EventRouter shutdown complete");
    }

    /// Admit everything still queued on the ingest channel, then flush.
    async fn drain(&mut self, batch: &mut Vec<Arc<Event>>, batch_size: usize) {
        let mut drained = 0usize;
        while let Ok(ingested) = self.ingest_rx.try_recv() {
            drained += 1;
            if !self.admit(&ingested).await {
                continue;
            }
            batch.push(ingested.event);
            if batch.len() >= batch_size {
                self.flush(batch);
            }
        }
        self.flush(batch);
        if drained > 0 {
            info!(drained, "Drained queued events before shutdown");
        }
    }

    async fn admit(&self, ingested: &IngestedEvent) -> bool {
        match self.dedup.admit(&ingested.event.id).await {
            Ok(Admission::Accepted) => true,
            Ok(Admission::Duplicate) => {
                RelayMetrics::incr(&self.metrics.duplicates_filtered);
                false
            }
            Err(e) => {
                // Not durably recorded, so it cannot be delivered.
                warn!(
                    event_id = %ingested.event.id,
                    source = %ingested.source,
                    error = %e,
                    "Dedup admission failed"
                );
                false
            }
        }
    }

    fn is_deliverable(&self, event: &Event, now: i64) -> bool {
        self.allowed_kinds.contains(&event.kind)
            && event.age_secs(now) <= self.config.stale_after.as_secs()
    }

    fn flush(&self, batch: &mut Vec<Arc<Event>>) {
        if batch.is_empty() {
            return;
        }
        let now = unix_now();
        let pending = batch.len();
        let events: Vec<Arc<Event>> = batch
            .drain(..)
            .filter(|event| self.is_deliverable(event, now))
            .collect();
        RelayMetrics::add(&self.metrics.events_filtered, (pending - events.len()) as u64);
        RelayMetrics::incr(&self.metrics.batches_flushed);

        if events.is_empty() {
            return;
        }
        for event in &events {
            self.hub.publish_event(event);
        }
        RelayMetrics::add(&self.metrics.events_processed, events.len() as u64);
        debug!(size = events.len(), "Batch flushed");

        if let Some(fanout_tx) = &self.fanout_tx {
            match fanout_tx.try_send(FanoutJob { events }) {
                Ok(()) => {}
                Err(TrySendError::Full(job)) => {
                    RelayMetrics::incr(&self.metrics.sink_failures);
                    warn!(size = job.events.len(), "Fanout queue full, batch dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    RelayMetrics::incr(&self.metrics.sink_failures);
                    warn!("Fanout worker gone");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::events::{fanout_job_channel, ingest_channel, IngestSender};
    use crate::storage::MemoryStore;
    use mtrelay_sdk::objects::event::EventKind;
    use std::time::Duration;

    struct Harness {
        ingest_tx: IngestSender,
        jobs: crate::events::FanoutJobReceiver,
        metrics: Arc<RelayMetrics>,
        shutdown_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
    }

    fn start(config: RouterConfig) -> Harness {
        let metrics = Arc::new(RelayMetrics::default());
        let dedup = Arc::new(DedupEngine::new(
            &DedupConfig::default(),
            Arc::new(MemoryStore::new()),
        ));
        let hub = StreamHub::new(16, metrics.clone());
        let (ingest_tx, ingest_rx) = ingest_channel();
        let (fanout_tx, jobs) = fanout_job_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = EventRouter::new(
            config,
            dedup,
            hub,
            Some(fanout_tx),
            metrics.clone(),
            ingest_rx,
            shutdown_rx,
        );
        let handle = tokio::spawn(router.run());
        Harness {
            ingest_tx,
            jobs,
            metrics,
            shutdown_tx,
            handle,
        }
    }

    fn ingested(seq: u64, id: &str, kind: u16, created_at: i64) -> IngestedEvent {
        IngestedEvent {
            seq,
            source: Arc::from("ws://test"),
            event: Arc::new(Event {
                id: id.to_string(),
                author_key: "a".repeat(64),
                created_at,
                kind,
                tags: Vec::new(),
                payload: String::new(),
                signature: String::new(),
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_then_latency_flush() {
        let mut h = start(RouterConfig {
            batch_size: 100,
            max_latency: Duration::from_millis(100),
            ..Default::default()
        });
        let now = unix_now();
        for n in 0..150u64 {
            h.ingest_tx
                .send(ingested(n, &format!("{n:064x}"), EventKind::TRADE_SIGNAL, now))
                .await
                .unwrap();
        }

        let first = h.jobs.recv().await.unwrap();
        assert_eq!(first.events.len(), 100);
        let started = Instant::now();
        let second = h.jobs.recv().await.unwrap();
        assert_eq!(second.events.len(), 50);
        assert!(started.elapsed() <= Duration::from_millis(100));

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
        assert_eq!(h.metrics.summary().batches_flushed_total, 2);
        assert_eq!(h.metrics.summary().events_processed_total, 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_and_stale_events_are_dropped() {
        let mut h = start(RouterConfig {
            batch_size: 10,
            ..Default::default()
        });
        let now = unix_now();
        h.ingest_tx
            .send(ingested(0, "id-1", EventKind::TRADE_SIGNAL, now))
            .await
            .unwrap();
        h.ingest_tx
            .send(ingested(1, "id-1", EventKind::TRADE_SIGNAL, now))
            .await
            .unwrap();
        h.ingest_tx
            .send(ingested(2, "id-old", EventKind::TRADE_SIGNAL, now - 3600))
            .await
            .unwrap();
        h.ingest_tx
            .send(ingested(3, "id-kind", 1, now))
            .await
            .unwrap();

        let job = h.jobs.recv().await.unwrap();
        assert_eq!(job.events.len(), 1);
        assert_eq!(job.events[0].id, "id-1");

        let summary = h.metrics.summary();
        assert_eq!(summary.duplicates_filtered_total, 1);
        assert_eq!(summary.events_filtered_total, 2);

        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_partial_batch() {
        let mut h = start(RouterConfig {
            batch_size: 10,
            max_latency: Duration::from_secs(60),
            ..Default::default()
        });
        h.ingest_tx
            .send(ingested(0, "id-1", EventKind::HEARTBEAT, unix_now()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();
        assert_eq!(h.jobs.recv().await.unwrap().events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queued_events() {
        let mut h = start(RouterConfig {
            batch_size: 2,
            max_latency: Duration::from_secs(60),
            ..Default::default()
        });
        // The router task has not been polled yet, so all three stay queued.
        let now = unix_now();
        for n in 0..3u64 {
            h.ingest_tx
                .send(ingested(n, &format!("queued-{n}"), EventKind::TRADE_SIGNAL, now))
                .await
                .unwrap();
        }
        h.shutdown_tx.send(true).unwrap();
        h.handle.await.unwrap();

        assert_eq!(h.jobs.recv().await.unwrap().events.len(), 2);
        assert_eq!(h.jobs.recv().await.unwrap().events.len(), 1);
        assert_eq!(h.metrics.summary().events_processed_total, 3);
    }
}
