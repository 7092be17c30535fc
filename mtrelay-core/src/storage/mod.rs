//! Durable state behind component-facing traits.
//!
//! Three stores back the pipeline:
//!
//! - [`DedupStore`]: seen event ids with their first-seen time
//! - [`RegistryStore`]: bots and follower subscriptions
//! - [`LedgerStore`]: trades, credit grants and credit balances
//!
//! [`PgStore`] implements all three over Postgres. [`MemoryStore`] implements
//! them in process for tests and for running without a database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::entities::bots::{Bot, NewBot};
use crate::entities::credits::{CreditEntry, CreditGrant};
use crate::entities::subscriptions::Subscription;
use crate::entities::trades::{AttemptOutcome, NewTrade, TradeRecord};
use crate::entities::TradeStatus;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A write referenced a bot that is not registered.
    #[error("unknown bot: {0}")]
    UnknownBot(String),
}

#[async_trait::async_trait]
pub trait DedupStore: Send + Sync {
    /// Record `id` as seen. Exactly one concurrent caller per id gets `true`.
    async fn insert_if_absent(&self, id: &str, first_seen_at: OffsetDateTime) -> Result<bool, StorageError>;

    async fn contains(&self, id: &str) -> Result<bool, StorageError>;

    /// Newest ids first.
    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;

    /// Delete records first seen before `cutoff`.
    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, StorageError>;

    /// Delete the oldest records beyond `max_entries`.
    async fn trim_to(&self, max_entries: u64) -> Result<u64, StorageError>;
}

#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync {
    async fn upsert_bot(&self, bot: NewBot) -> Result<Bot, StorageError>;

    async fn get_bot(&self, bot_pubkey: &str) -> Result<Option<Bot>, StorageError>;

    /// Match on `nostr_pubkey` first, then `bot_pubkey`.
    async fn find_bot_by_author(&self, author_key: &str) -> Result<Option<Bot>, StorageError>;

    /// Refresh `last_seen_at` unless it is newer than `not_before`.
    async fn touch_bot(
        &self,
        bot_pubkey: &str,
        seen_at: OffsetDateTime,
        not_before: OffsetDateTime,
    ) -> Result<bool, StorageError>;

    /// Upsert by `(bot, follower)`. Fails with [`StorageError::UnknownBot`].
    async fn add_subscription(&self, subscription: Subscription) -> Result<(), StorageError>;

    /// Ordered by follower key.
    async fn list_subscriptions(&self, bot_pubkey: &str) -> Result<Vec<Subscription>, StorageError>;

    async fn list_follower_secrets(&self, follower_pubkey: &str) -> Result<Vec<String>, StorageError>;
}

/// A pending trade's terminal transition, with the credit it earns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalize {
    pub tx_hash: String,
    pub status: TradeStatus,
    pub pnl: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    /// Only set for confirmed trades while crediting is enabled.
    pub grant: Option<CreditGrant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// The trade moved out of `pending`.
    pub applied: bool,
    /// The recipient's balance was incremented.
    pub credited: bool,
}

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a pending trade. `false` if the `tx_hash` already exists.
    async fn insert_trade(&self, trade: NewTrade) -> Result<bool, StorageError>;

    async fn get_trade(&self, tx_hash: &str) -> Result<Option<TradeRecord>, StorageError>;

    /// Oldest first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<TradeRecord>, StorageError>;

    async fn record_attempt(
        &self,
        tx_hash: &str,
        max_attempts: i32,
    ) -> Result<Option<AttemptOutcome>, StorageError>;

    /// Guarded transition, grant marker and balance increment, all or
    /// nothing.
    async fn finalize(&self, finalize: Finalize) -> Result<FinalizeOutcome, StorageError>;

    /// Largest balance first, then by `(bot, follower)`.
    async fn list_credits(
        &self,
        bot_pubkey: Option<&str>,
        follower_pubkey: Option<&str>,
    ) -> Result<Vec<CreditEntry>, StorageError>;
}

/// The three stores as shared trait objects.
#[derive(Clone)]
pub struct Stores {
    pub dedup: Arc<dyn DedupStore>,
    pub registry: Arc<dyn RegistryStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    pub fn postgres(store: PgStore) -> Self {
        Self::from_backend(Arc::new(store))
    }

    fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: DedupStore + RegistryStore + LedgerStore + 'static,
    {
        Self {
            dedup: store.clone(),
            registry: store.clone(),
            ledger: store,
        }
    }
}
