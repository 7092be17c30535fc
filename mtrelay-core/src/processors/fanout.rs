//! FanoutWorker processor.
//!
//! The FanoutWorker is responsible for:
//! - Receiving `FanoutJob` batches from the router
//! - Refreshing bot liveness on heartbeats
//! - Registering bots announced through agent registration events
//! - Recording pending trades from execution reports
//! - Sealing one payload per follower of the authoring bot and publishing it
//!   to the `StreamHub`

use crate::entities::bots::{Bot, NewBot};
use crate::entities::trades::NewTrade;
use crate::entities::TradeRole;
use crate::events::{FanoutJob, FanoutJobReceiver};
use crate::hub::StreamHub;
use crate::metrics::RelayMetrics;
use crate::sealing::{PayloadSealer, SealError};
use crate::settlement::{RecordOutcome, SettlementError, SettlementService};
use crate::storage::{RegistryStore, StorageError};
use crate::utils::clock::now_utc;
use mtrelay_sdk::objects::agent::{AgentRegistration, ExecutionReport};
use mtrelay_sdk::objects::event::{Event, EventKind};
use mtrelay_sdk::objects::stream::FanoutMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Heartbeats refresh `last_seen_at` at most this often per bot.
const HEARTBEAT_THROTTLE: time::Duration = time::Duration::minutes(15);

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("sealing failed: {0}")]
    Seal(#[from] SealError),

    #[error("invalid event content: {0}")]
    InvalidContent(#[from] serde_json::Error),

    #[error("agent registration without eth address")]
    MissingEthAddress,
}

pub struct FanoutWorker {
    registry: Arc<dyn RegistryStore>,
    settlement: SettlementService,
    sealer: Arc<dyn PayloadSealer>,
    hub: StreamHub,
    metrics: Arc<RelayMetrics>,
    job_rx: FanoutJobReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl FanoutWorker {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        settlement: SettlementService,
        sealer: Arc<dyn PayloadSealer>,
        hub: StreamHub,
        metrics: Arc<RelayMetrics>,
        job_rx: FanoutJobReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            settlement,
            sealer,
            hub,
            metrics,
            job_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("FanoutWorker started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    // A dropped sender also means shutdown.
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("FanoutWorker received shutdown signal");
                        break;
                    }
                }

                Some(job) = self.job_rx.recv() => {
                    self.process_job(job).await;
                }

                else => {
                    info!("Fanout channel closed");
                    break;
                }
            }
        }

        info!("FanoutWorker shutdown complete");
    }

    async fn process_job(&self, job: FanoutJob) {
        for event in &job.events {
            if let Err(e) = self.process_event(event).await {
                RelayMetrics::incr(&self.metrics.sink_failures);
                error!(event_id = %event.id, kind = event.kind, error = %e, "Fanout failed");
            }
        }
    }

    async fn process_event(&self, event: &Event) -> Result<(), FanoutError> {
        match event.kind {
            EventKind::HEARTBEAT => self.handle_heartbeat(event).await,
            EventKind::AGENT_REGISTER => self.handle_registration(event).await,
            kind => {
                let Some(bot) = self.registry.find_bot_by_author(&event.author_key).await? else {
                    debug!(author = %event.author_key, "No registered bot for author");
                    return Ok(());
                };
                if kind == EventKind::EXECUTION_REPORT {
                    self.handle_execution_report(&bot, event).await?;
                }
                self.fan_out(&bot, event).await
            }
        }
    }

    async fn handle_heartbeat(&self, event: &Event) -> Result<(), FanoutError> {
        let Some(bot) = self.registry.find_bot_by_author(&event.author_key).await? else {
            return Ok(());
        };
        let now = now_utc();
        if self
            .registry
            .touch_bot(&bot.bot_pubkey, now, now - HEARTBEAT_THROTTLE)
            .await?
        {
            debug!(bot = %bot.bot_pubkey, "Bot heartbeat recorded");
        }
        Ok(())
    }

    async fn handle_registration(&self, event: &Event) -> Result<(), FanoutError> {
        let registration: AgentRegistration = serde_json::from_str(&event.payload)?;
        if registration.eth_address.is_empty() {
            return Err(FanoutError::MissingEthAddress);
        }
        let bot = self
            .registry
            .upsert_bot(NewBot {
                bot_pubkey: registration
                    .bot_pubkey
                    .unwrap_or_else(|| event.author_key.clone()),
                nostr_pubkey: registration
                    .nostr_pubkey
                    .unwrap_or_else(|| event.author_key.clone()),
                eth_address: registration.eth_address,
                name: registration.name,
            })
            .await?;
        info!(bot = %bot.bot_pubkey, eth = %bot.eth_address, "Bot registered from event");
        Ok(())
    }

    async fn handle_execution_report(&self, bot: &Bot, event: &Event) -> Result<(), FanoutError> {
        let report: ExecutionReport = match serde_json::from_str(&event.payload) {
            Ok(report) => report,
            Err(e) => {
                // Still fanned out, just not recorded.
                warn!(event_id = %event.id, error = %e, "Unreadable execution report");
                return Ok(());
            }
        };
        let Some(tx_hash) = report
            .tx_hash
            .clone()
            .or_else(|| event.tag_value("tx_hash").map(str::to_owned))
        else {
            return Ok(());
        };

        let role = report.role.map(TradeRole::from).unwrap_or(TradeRole::Leader);
        let is_test = report.is_test();
        let trade = NewTrade {
            tx_hash: tx_hash.clone(),
            bot_pubkey: bot.bot_pubkey.clone(),
            follower_pubkey: match role {
                TradeRole::Leader => None,
                TradeRole::Follower => report.follower_pubkey,
            },
            role,
            symbol: report.symbol,
            side: report.side.into(),
            size: report.size,
            price: report.price,
            is_test,
        };
        match self.settlement.record_trade(trade).await {
            Ok(RecordOutcome::Recorded) => {
                info!(tx_hash = %tx_hash, bot = %bot.bot_pubkey, "Trade recorded from execution report")
            }
            Ok(RecordOutcome::AlreadyRecorded) => {}
            Err(SettlementError::TradeConflict(tx_hash)) => {
                warn!(tx_hash = %tx_hash, "Execution report conflicts with recorded trade");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn fan_out(&self, bot: &Bot, event: &Event) -> Result<(), FanoutError> {
        let subscriptions = self.registry.list_subscriptions(&bot.bot_pubkey).await?;
        let mut delivered = 0usize;
        for subscription in subscriptions {
            let sealed_payload = self
                .sealer
                .seal(&subscription.shared_secret, event.payload.as_bytes())?;
            delivered += self.hub.publish_fanout(FanoutMessage {
                bot_pubkey: bot.bot_pubkey.clone(),
                follower_pubkey: subscription.follower_pubkey,
                event_id: event.id.clone(),
                kind: event.kind,
                created_at: event.created_at,
                sealed_payload,
            });
            RelayMetrics::incr(&self.metrics.fanout_messages);
        }
        debug!(event_id = %event.id, bot = %bot.bot_pubkey, delivered, "Event fanned out");
        Ok(())
    }
}
