//! SettlementWorker processor.
//!
//! The SettlementWorker is responsible for:
//! - Polling pending trades every `poll_interval`, oldest first
//! - Asking the `TransactionVerifier` about each one
//! - Finalizing confirmed and failed trades through the `SettlementService`
//! - Counting attempts for invisible transactions and transient errors, and
//!   timing trades out once `max_attempts` is reached

use crate::config::SettlementConfig;
use crate::entities::trades::TradeRecord;
use crate::entities::TradeStatus;
use crate::metrics::RelayMetrics;
use crate::settlement::{
    SettlementError, SettlementService, TransactionVerifier, Verification, VerifyError,
};
use crate::storage::LedgerStore;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct SettlementWorker {
    config: SettlementConfig,
    ledger: Arc<dyn LedgerStore>,
    service: SettlementService,
    verifier: Arc<dyn TransactionVerifier>,
    metrics: Arc<RelayMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SettlementWorker {
    pub fn new(
        config: SettlementConfig,
        ledger: Arc<dyn LedgerStore>,
        service: SettlementService,
        verifier: Arc<dyn TransactionVerifier>,
        metrics: Arc<RelayMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            ledger,
            service,
            verifier,
            metrics,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_limit = self.config.batch_limit,
            "SettlementWorker started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("SettlementWorker received shutdown signal");
                        break;
                    }
                }

                _ = interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Settlement poll failed");
                    }
                }
            }
        }

        info!("SettlementWorker shutdown complete");
    }

    /// One verification pass. Returns how many trades were examined.
    pub async fn poll_once(&self) -> Result<usize, SettlementError> {
        let pending = self.ledger.list_pending(self.config.batch_limit).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        debug!(count = pending.len(), "Verifying pending trades");

        for trade in &pending {
            if let Err(e) = self.settle(trade).await {
                error!(tx_hash = %trade.tx_hash, error = %e, "Failed to settle trade");
            }
        }
        Ok(pending.len())
    }

    async fn settle(&self, trade: &TradeRecord) -> Result<(), SettlementError> {
        match self.verifier.verify(&trade.tx_hash).await {
            Ok(Verification::Confirmed) => {
                self.service
                    .finalize(trade, TradeStatus::Confirmed, trade.pnl, trade.pnl_usd)
                    .await?;
            }
            Ok(Verification::Failed) => {
                self.service
                    .finalize(trade, TradeStatus::Failed, trade.pnl, trade.pnl_usd)
                    .await?;
            }
            Ok(Verification::NotFound) => self.count_attempt(trade, "not visible yet").await?,
            Err(VerifyError::Transient(reason)) => {
                warn!(tx_hash = %trade.tx_hash, reason = %reason, "Transient verification error");
                self.count_attempt(trade, "transient error").await?;
            }
        }
        Ok(())
    }

    async fn count_attempt(&self, trade: &TradeRecord, reason: &str) -> Result<(), SettlementError> {
        let Some(outcome) = self
            .ledger
            .record_attempt(&trade.tx_hash, self.config.max_attempts)
            .await?
        else {
            // Settled elsewhere in the meantime.
            return Ok(());
        };
        if outcome.status == TradeStatus::Timeout {
            RelayMetrics::incr(&self.metrics.trades_settled);
            info!(tx_hash = %trade.tx_hash, attempts = outcome.attempts, "Trade timed out");
        } else {
            debug!(tx_hash = %trade.tx_hash, attempts = outcome.attempts, reason, "Verification retry scheduled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreditPolicy;
    use crate::entities::TradeRole;
    use crate::settlement::testing::{service_with_bot, trade};
    use crate::storage::MemoryStore;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Answers from a fixed table. Unknown hashes are transient errors.
    #[derive(Default)]
    struct ScriptedVerifier {
        answers: Mutex<HashMap<String, Verification>>,
    }

    impl ScriptedVerifier {
        fn answer(&self, tx_hash: &str, verification: Verification) {
            self.answers.lock().insert(tx_hash.to_string(), verification);
        }
    }

    #[async_trait::async_trait]
    impl TransactionVerifier for ScriptedVerifier {
        async fn verify(&self, tx_hash: &str) -> Result<Verification, VerifyError> {
            self.answers
                .lock()
                .get(tx_hash)
                .copied()
                .ok_or_else(|| VerifyError::Transient("explorer returned 503".to_string()))
        }
    }

    fn config(max_attempts: i32) -> SettlementConfig {
        SettlementConfig {
            explorer_base: "https://explorer.invalid/tx".parse().unwrap(),
            poll_interval: Duration::from_secs(30),
            batch_limit: 50,
            max_attempts,
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn worker(max_attempts: i32) -> (SettlementWorker, Arc<ScriptedVerifier>, Arc<MemoryStore>) {
        let (service, store) = service_with_bot(Some(CreditPolicy::default())).await;
        let verifier = Arc::new(ScriptedVerifier::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = SettlementWorker::new(
            config(max_attempts),
            store.clone(),
            service,
            verifier.clone(),
            Arc::new(RelayMetrics::default()),
            shutdown_rx,
        );
        (worker, verifier, store)
    }

    #[tokio::test]
    async fn test_confirmed_and_failed_are_finalized() {
        let (worker, verifier, store) = worker(3).await;
        let service = &worker.service;
        service.record_trade(trade("0xok", TradeRole::Leader, None)).await.unwrap();
        service.record_trade(trade("0xbad", TradeRole::Leader, None)).await.unwrap();
        verifier.answer("0xok", Verification::Confirmed);
        verifier.answer("0xbad", Verification::Failed);

        assert_eq!(worker.poll_once().await.unwrap(), 2);

        let ok = store.get_trade("0xok").await.unwrap().unwrap();
        assert_eq!(ok.status, TradeStatus::Confirmed);
        assert!(ok.credit_applied);
        let bad = store.get_trade("0xbad").await.unwrap().unwrap();
        assert_eq!(bad.status, TradeStatus::Failed);
        assert!(!bad.credit_applied);

        // Nothing left to do, and the credit was granted once.
        assert_eq!(worker.poll_once().await.unwrap(), 0);
        let credits = store.list_credits(Some("bot-1"), None).await.unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].credits, dec!(0.5));
    }

    #[tokio::test]
    async fn test_invisible_trade_times_out() {
        let (worker, verifier, store) = worker(3).await;
        worker
            .service
            .record_trade(trade("0xslow", TradeRole::Leader, None))
            .await
            .unwrap();
        verifier.answer("0xslow", Verification::NotFound);

        worker.poll_once().await.unwrap();
        worker.poll_once().await.unwrap();
        let trade = store.get_trade("0xslow").await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);
        assert_eq!(trade.attempts, 2);

        worker.poll_once().await.unwrap();
        let trade = store.get_trade("0xslow").await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Timeout);
        assert_eq!(worker.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_count_as_attempts() {
        let (worker, _verifier, store) = worker(1).await;
        worker
            .service
            .record_trade(trade("0xflaky", TradeRole::Leader, None))
            .await
            .unwrap();
        worker.poll_once().await.unwrap();
        let trade = store.get_trade("0xflaky").await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Timeout);
        assert!(!trade.credit_applied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_shutdown() {
        let (worker, verifier, store) = worker(3).await;
        worker
            .service
            .record_trade(trade("0xok", TradeRole::Leader, None))
            .await
            .unwrap();
        verifier.answer("0xok", Verification::Confirmed);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = SettlementWorker {
            shutdown_rx,
            ..worker
        };
        let handle = tokio::spawn(worker.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let trade = store.get_trade("0xok").await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Confirmed);
    }
}
