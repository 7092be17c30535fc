//! Trade settlement and the credit ledger.
//!
//! [`SettlementService`] is the single path through which trades are
//! recorded and leave `pending`, whether driven by the verifier poll loop
//! or a manual update on the control surface.

mod credit;
mod verifier;

pub use credit::compute_credit;
pub use verifier::{ExplorerVerifier, TransactionVerifier, Verification, VerifyError, classify_status};

use crate::config::ConfigStore;
use crate::config::CreditPolicy;
use crate::entities::credits::{CreditEntry, CreditGrant};
use crate::entities::trades::{NewTrade, TradeRecord};
use crate::entities::{TradeRole, TradeStatus};
use crate::metrics::RelayMetrics;
use crate::storage::{Finalize, LedgerStore, StorageError};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("unknown bot: {0}")]
    UnknownBot(String),

    /// The `tx_hash` is already recorded with a different payload.
    #[error("trade {0} already recorded with different details")]
    TradeConflict(String),

    #[error("trade not found: {0}")]
    TradeNotFound(String),

    #[error("settlement status must be terminal")]
    NotTerminal,
}

impl From<StorageError> for SettlementError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::UnknownBot(bot) => Self::UnknownBot(bot),
            other => Self::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// Same payload already stored under this `tx_hash`.
    AlreadyRecorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    /// Status of the trade after the call.
    pub status: TradeStatus,
    /// `false` when the trade was already terminal.
    pub applied: bool,
    pub credit: Option<Decimal>,
}

#[derive(Clone)]
pub struct SettlementService {
    ledger: Arc<dyn LedgerStore>,
    credit_policy: ConfigStore<Option<CreditPolicy>>,
    metrics: Arc<RelayMetrics>,
}

impl SettlementService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        credit_policy: ConfigStore<Option<CreditPolicy>>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            ledger,
            credit_policy,
            metrics,
        }
    }

    /// Record a pending trade. Idempotent for an identical payload.
    pub async fn record_trade(&self, trade: NewTrade) -> Result<RecordOutcome, SettlementError> {
        let tx_hash = trade.tx_hash.clone();
        if self.ledger.insert_trade(trade.clone()).await? {
            info!(tx_hash = %tx_hash, bot = %trade.bot_pubkey, "Trade recorded");
            return Ok(RecordOutcome::Recorded);
        }
        match self.ledger.get_trade(&tx_hash).await? {
            Some(existing) if trade.matches(&existing) => Ok(RecordOutcome::AlreadyRecorded),
            _ => Err(SettlementError::TradeConflict(tx_hash)),
        }
    }

    pub async fn get_trade(&self, tx_hash: &str) -> Result<Option<TradeRecord>, SettlementError> {
        Ok(self.ledger.get_trade(tx_hash).await?)
    }

    pub async fn list_credits(
        &self,
        bot_pubkey: Option<&str>,
        follower_pubkey: Option<&str>,
    ) -> Result<Vec<CreditEntry>, SettlementError> {
        Ok(self.ledger.list_credits(bot_pubkey, follower_pubkey).await?)
    }

    /// Manual settlement by `tx_hash`.
    pub async fn update_settlement(
        &self,
        tx_hash: &str,
        status: TradeStatus,
        pnl: Option<Decimal>,
        pnl_usd: Option<Decimal>,
    ) -> Result<SettlementOutcome, SettlementError> {
        if !status.is_terminal() {
            return Err(SettlementError::NotTerminal);
        }
        let trade = self
            .ledger
            .get_trade(tx_hash)
            .await?
            .ok_or_else(|| SettlementError::TradeNotFound(tx_hash.to_owned()))?;
        self.finalize(&trade, status, pnl, pnl_usd).await
    }

    /// Move `trade` to a terminal status, crediting confirmed trades.
    ///
    /// A trade that is already terminal is left untouched.
    pub async fn finalize(
        &self,
        trade: &TradeRecord,
        status: TradeStatus,
        pnl: Option<Decimal>,
        pnl_usd: Option<Decimal>,
    ) -> Result<SettlementOutcome, SettlementError> {
        if trade.status.is_terminal() {
            return Ok(SettlementOutcome {
                status: trade.status,
                applied: false,
                credit: None,
            });
        }

        let grant = if status == TradeStatus::Confirmed {
            self.credit_policy
                .snapshot()
                .await
                .map(|policy| CreditGrant {
                    tx_hash: trade.tx_hash.clone(),
                    bot_pubkey: trade.bot_pubkey.clone(),
                    follower_pubkey: match trade.role {
                        TradeRole::Leader => None,
                        TradeRole::Follower => trade.follower_pubkey.clone(),
                    },
                    amount: compute_credit(
                        &policy,
                        trade.role,
                        pnl_usd.or(trade.pnl_usd),
                        trade.is_test,
                    ),
                })
        } else {
            None
        };
        let amount = grant.as_ref().map(|g| g.amount);

        let outcome = self
            .ledger
            .finalize(Finalize {
                tx_hash: trade.tx_hash.clone(),
                status,
                pnl,
                pnl_usd,
                grant,
            })
            .await?;

        if !outcome.applied {
            // Lost a race with another settlement path.
            let current = self
                .ledger
                .get_trade(&trade.tx_hash)
                .await?
                .map_or(status, |t| t.status);
            return Ok(SettlementOutcome {
                status: current,
                applied: false,
                credit: None,
            });
        }

        RelayMetrics::incr(&self.metrics.trades_settled);
        let credit = if outcome.credited { amount } else { None };
        info!(
            tx_hash = %trade.tx_hash,
            status = ?status,
            credit = ?credit,
            "Trade settled"
        );
        Ok(SettlementOutcome {
            status,
            applied: true,
            credit,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::entities::bots::NewBot;
    use crate::entities::TradeSide;
    use crate::storage::{MemoryStore, RegistryStore};

    pub async fn service_with_bot(
        policy: Option<CreditPolicy>,
    ) -> (SettlementService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_bot(NewBot {
                bot_pubkey: "bot-1".to_string(),
                nostr_pubkey: "nostr-1".to_string(),
                eth_address: "0x01".to_string(),
                name: "leader".to_string(),
            })
            .await
            .unwrap();
        let service = SettlementService::new(
            store.clone(),
            ConfigStore::new(policy),
            Arc::new(RelayMetrics::default()),
        );
        (service, store)
    }

    pub fn trade(tx_hash: &str, role: TradeRole, follower: Option<&str>) -> NewTrade {
        NewTrade {
            tx_hash: tx_hash.to_string(),
            bot_pubkey: "bot-1".to_string(),
            follower_pubkey: follower.map(str::to_string),
            role,
            symbol: "ETH".to_string(),
            side: TradeSide::Sell,
            size: Decimal::ONE,
            price: Decimal::new(3000, 0),
            is_test: false,
        }
    }
}
