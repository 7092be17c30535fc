use super::{DedupStore, Finalize, FinalizeOutcome, LedgerStore, RegistryStore, StorageError};
use crate::entities::bots::{Bot, FindBotByAuthor, GetBot, NewBot, TouchBot, UpsertBot};
use crate::entities::credits::{CreditEntry, ListCredits};
use crate::entities::dedup_records::{
    ContainsDedupRecord, CountDedupRecords, DeleteDedupRecordsBefore, InsertDedupRecord,
    ListRecentDedupIds, TrimDedupRecords,
};
use crate::entities::subscriptions::{
    ListFollowerSecrets, ListSubscriptions, Subscription, UpsertSubscription,
};
use crate::entities::trades::{
    AttemptOutcome, GetTrade, InsertTrade, ListPendingTrades, NewTrade, RecordTradeAttempt,
    TradeRecord,
};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use time::OffsetDateTime;

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl DedupStore for PgStore {
    async fn insert_if_absent(&self, id: &str, first_seen_at: OffsetDateTime) -> Result<bool, StorageError> {
        let inserted = self
            .db
            .process(InsertDedupRecord {
                id: id.to_owned(),
                first_seen_at,
            })
            .await?;
        Ok(inserted)
    }

    async fn contains(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self
            .db
            .process(ContainsDedupRecord { id: id.to_owned() })
            .await?)
    }

    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        Ok(self
            .db
            .process(ListRecentDedupIds {
                limit: clamp_limit(limit),
            })
            .await?)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let count = self.db.process(CountDedupRecords).await?;
        Ok(count.max(0) as u64)
    }

    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, StorageError> {
        Ok(self.db.process(DeleteDedupRecordsBefore { cutoff }).await?)
    }

    async fn trim_to(&self, max_entries: u64) -> Result<u64, StorageError> {
        let keep = i64::try_from(max_entries).unwrap_or(i64::MAX);
        Ok(self.db.process(TrimDedupRecords { keep }).await?)
    }
}

#[async_trait::async_trait]
impl RegistryStore for PgStore {
    async fn upsert_bot(&self, bot: NewBot) -> Result<Bot, StorageError> {
        Ok(self.db.process(UpsertBot { bot }).await?)
    }

    async fn get_bot(&self, bot_pubkey: &str) -> Result<Option<Bot>, StorageError> {
        Ok(self
            .db
            .process(GetBot {
                bot_pubkey: bot_pubkey.to_owned(),
            })
            .await?)
    }

    async fn find_bot_by_author(&self, author_key: &str) -> Result<Option<Bot>, StorageError> {
        Ok(self
            .db
            .process(FindBotByAuthor {
                author_key: author_key.to_owned(),
            })
            .await?)
    }

    async fn touch_bot(
        &self,
        bot_pubkey: &str,
        seen_at: OffsetDateTime,
        not_before: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        Ok(self
            .db
            .process(TouchBot {
                bot_pubkey: bot_pubkey.to_owned(),
                seen_at,
                not_before,
            })
            .await?)
    }

    async fn add_subscription(&self, subscription: Subscription) -> Result<(), StorageError> {
        let bot_pubkey = subscription.bot_pubkey.clone();
        let written = self.db.process(UpsertSubscription { subscription }).await?;
        if written == 0 {
            return Err(StorageError::UnknownBot(bot_pubkey));
        }
        Ok(())
    }

    async fn list_subscriptions(&self, bot_pubkey: &str) -> Result<Vec<Subscription>, StorageError> {
        Ok(self
            .db
            .process(ListSubscriptions {
                bot_pubkey: bot_pubkey.to_owned(),
            })
            .await?)
    }

    async fn list_follower_secrets(&self, follower_pubkey: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .db
            .process(ListFollowerSecrets {
                follower_pubkey: follower_pubkey.to_owned(),
            })
            .await?)
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgStore {
    async fn insert_trade(&self, trade: NewTrade) -> Result<bool, StorageError> {
        let bot_pubkey = trade.bot_pubkey.clone();
        match self.db.process(InsertTrade { trade }).await {
            Ok(inserted) => Ok(inserted),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(StorageError::UnknownBot(bot_pubkey))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_trade(&self, tx_hash: &str) -> Result<Option<TradeRecord>, StorageError> {
        Ok(self
            .db
            .process(GetTrade {
                tx_hash: tx_hash.to_owned(),
            })
            .await?)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<TradeRecord>, StorageError> {
        Ok(self.db.process(ListPendingTrades { limit }).await?)
    }

    async fn record_attempt(
        &self,
        tx_hash: &str,
        max_attempts: i32,
    ) -> Result<Option<AttemptOutcome>, StorageError> {
        Ok(self
            .db
            .process(RecordTradeAttempt {
                tx_hash: tx_hash.to_owned(),
                max_attempts,
            })
            .await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:FinalizeTrade", fields(tx_hash = %finalize.tx_hash))]
    async fn finalize(&self, finalize: Finalize) -> Result<FinalizeOutcome, StorageError> {
        let mut tx = self.db.begin().await?;

        let applied = TradeRecord::finalize_tx(
            &mut tx,
            &finalize.tx_hash,
            finalize.status,
            finalize.pnl,
            finalize.pnl_usd,
            finalize.grant.is_some(),
        )
        .await?;
        if !applied {
            tx.rollback().await?;
            return Ok(FinalizeOutcome {
                applied: false,
                credited: false,
            });
        }

        let mut credited = false;
        if let Some(grant) = &finalize.grant {
            if grant.insert_tx(&mut tx).await? {
                grant.apply_tx(&mut tx).await?;
                credited = true;
            }
        }

        tx.commit().await?;
        Ok(FinalizeOutcome { applied, credited })
    }

    async fn list_credits(
        &self,
        bot_pubkey: Option<&str>,
        follower_pubkey: Option<&str>,
    ) -> Result<Vec<CreditEntry>, StorageError> {
        Ok(self
            .db
            .process(ListCredits {
                bot_pubkey: bot_pubkey.map(str::to_owned),
                follower_pubkey: follower_pubkey.map(str::to_owned),
            })
            .await?)
    }
}
