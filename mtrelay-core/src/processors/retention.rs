//! RetentionSweeper processor.
//!
//! Every `sweep_interval` the durable dedup store is cut back to the
//! retention horizon: records older than `retention` go first, then the
//! oldest records beyond `max_entries`.

use crate::config::DedupConfig;
use crate::storage::{DedupStore, StorageError};
use crate::utils::clock::now_utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: u64,
    pub trimmed: u64,
}

pub struct RetentionSweeper {
    config: DedupConfig,
    store: Arc<dyn DedupStore>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RetentionSweeper {
    pub fn new(
        config: DedupConfig,
        store: Arc<dyn DedupStore>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            store,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            retention_secs = self.config.retention.as_secs(),
            max_entries = self.config.max_entries,
            "RetentionSweeper started"
        );
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("RetentionSweeper received shutdown signal");
                        break;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }

        info!("RetentionSweeper shutdown complete");
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, StorageError> {
        let retention = time::Duration::try_from(self.config.retention)
            .unwrap_or(time::Duration::MAX);
        let cutoff = now_utc()
            .checked_sub(retention)
            .unwrap_or(time::OffsetDateTime::UNIX_EPOCH);

        let report = SweepReport {
            expired: self.store.purge_older_than(cutoff).await?,
            trimmed: self.store.trim_to(self.config.max_entries).await?,
        };
        if report.expired > 0 || report.trimmed > 0 {
            info!(
                expired = report.expired,
                trimmed = report.trimmed,
                "Swept dedup records"
            );
        }
        Ok(report)
    }
}
