use super::{DedupStore, Finalize, FinalizeOutcome, LedgerStore, RegistryStore, StorageError};
use crate::entities::TradeStatus;
use crate::entities::bots::{Bot, NewBot};
use crate::entities::credits::{CreditEntry, CreditGrant};
use crate::entities::subscriptions::Subscription;
use crate::entities::trades::{AttemptOutcome, NewTrade, TradeRecord};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

/// In-process implementation of every store trait.
///
/// Each table group sits behind its own mutex. When two are needed the
/// registry lock is always taken before the ledger lock.
#[derive(Default)]
pub struct MemoryStore {
    dedup: Mutex<HashMap<String, OffsetDateTime>>,
    registry: Mutex<Registry>,
    ledger: Mutex<Ledger>,
}

#[derive(Default)]
struct Registry {
    bots: BTreeMap<String, Bot>,
    /// `(bot, follower) -> secret`
    subscriptions: BTreeMap<(String, String), String>,
}

#[derive(Default)]
struct Ledger {
    /// Insertion order breaks ties between equal `created_at`.
    trades: HashMap<String, (u64, TradeRecord)>,
    next_seq: u64,
    grants: HashMap<String, CreditGrant>,
    /// `(bot, follower or "") -> balance`
    credits: BTreeMap<(String, String), Decimal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry {
    fn find_by_author(&self, author_key: &str) -> Option<&Bot> {
        self.bots
            .values()
            .find(|bot| bot.nostr_pubkey == author_key)
            .or_else(|| self.bots.get(author_key))
    }
}

#[async_trait::async_trait]
impl DedupStore for MemoryStore {
    async fn insert_if_absent(&self, id: &str, first_seen_at: OffsetDateTime) -> Result<bool, StorageError> {
        let mut records = self.dedup.lock();
        if records.contains_key(id) {
            return Ok(false);
        }
        records.insert(id.to_owned(), first_seen_at);
        Ok(true)
    }

    async fn contains(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.dedup.lock().contains_key(id))
    }

    async fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        let records = self.dedup.lock();
        let mut entries: Vec<(&String, &OffsetDateTime)> = records.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| b.0.cmp(a.0)));
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.dedup.lock().len() as u64)
    }

    async fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<u64, StorageError> {
        let mut records = self.dedup.lock();
        let before = records.len();
        records.retain(|_, seen| *seen >= cutoff);
        Ok((before - records.len()) as u64)
    }

    async fn trim_to(&self, max_entries: u64) -> Result<u64, StorageError> {
        let mut records = self.dedup.lock();
        let keep = usize::try_from(max_entries).unwrap_or(usize::MAX);
        if records.len() <= keep {
            return Ok(0);
        }
        let mut entries: Vec<(String, OffsetDateTime)> =
            records.iter().map(|(id, seen)| (id.clone(), *seen)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        let evicted = entries.split_off(keep);
        for (id, _) in &evicted {
            records.remove(id);
        }
        Ok(evicted.len() as u64)
    }
}

#[async_trait::async_trait]
impl RegistryStore for MemoryStore {
    async fn upsert_bot(&self, bot: NewBot) -> Result<Bot, StorageError> {
        let mut registry = self.registry.lock();
        let last_seen_at = registry
            .bots
            .get(&bot.bot_pubkey)
            .and_then(|existing| existing.last_seen_at);
        let stored = Bot {
            bot_pubkey: bot.bot_pubkey,
            nostr_pubkey: bot.nostr_pubkey,
            eth_address: bot.eth_address,
            name: bot.name,
            last_seen_at,
        };
        registry
            .bots
            .insert(stored.bot_pubkey.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_bot(&self, bot_pubkey: &str) -> Result<Option<Bot>, StorageError> {
        Ok(self.registry.lock().bots.get(bot_pubkey).cloned())
    }

    async fn find_bot_by_author(&self, author_key: &str) -> Result<Option<Bot>, StorageError> {
        Ok(self.registry.lock().find_by_author(author_key).cloned())
    }

    async fn touch_bot(
        &self,
        bot_pubkey: &str,
        seen_at: OffsetDateTime,
        not_before: OffsetDateTime,
    ) -> Result<bool, StorageError> {
        let mut registry = self.registry.lock();
        let Some(bot) = registry.bots.get_mut(bot_pubkey) else {
            return Ok(false);
        };
        match bot.last_seen_at {
            Some(last) if last >= not_before => Ok(false),
            _ => {
                bot.last_seen_at = Some(seen_at);
                Ok(true)
            }
        }
    }

    async fn add_subscription(&self, subscription: Subscription) -> Result<(), StorageError> {
        let mut registry = self.registry.lock();
        if !registry.bots.contains_key(&subscription.bot_pubkey) {
            return Err(StorageError::UnknownBot(subscription.bot_pubkey));
        }
        registry.subscriptions.insert(
            (subscription.bot_pubkey, subscription.follower_pubkey),
            subscription.shared_secret,
        );
        Ok(())
    }

    async fn list_subscriptions(&self, bot_pubkey: &str) -> Result<Vec<Subscription>, StorageError> {
        let registry = self.registry.lock();
        Ok(registry
            .subscriptions
            .iter()
            .filter(|((bot, _), _)| bot == bot_pubkey)
            .map(|((bot, follower), secret)| Subscription {
                bot_pubkey: bot.clone(),
                follower_pubkey: follower.clone(),
                shared_secret: secret.clone(),
            })
            .collect())
    }

    async fn list_follower_secrets(&self, follower_pubkey: &str) -> Result<Vec<String>, StorageError> {
        let registry = self.registry.lock();
        Ok(registry
            .subscriptions
            .iter()
            .filter(|((_, follower), _)| follower == follower_pubkey)
            .map(|(_, secret)| secret.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_trade(&self, trade: NewTrade) -> Result<bool, StorageError> {
        let registry = self.registry.lock();
        if !registry.bots.contains_key(&trade.bot_pubkey) {
            return Err(StorageError::UnknownBot(trade.bot_pubkey));
        }
        let mut ledger = self.ledger.lock();
        drop(registry);
        if ledger.trades.contains_key(&trade.tx_hash) {
            return Ok(false);
        }
        let seq = ledger.next_seq;
        ledger.next_seq += 1;
        let record = TradeRecord {
            tx_hash: trade.tx_hash.clone(),
            bot_pubkey: trade.bot_pubkey,
            follower_pubkey: trade.follower_pubkey,
            role: trade.role,
            symbol: trade.symbol,
            side: trade.side,
            size: trade.size,
            price: trade.price,
            status: TradeStatus::Pending,
            pnl: None,
            pnl_usd: None,
            attempts: 0,
            credit_applied: false,
            is_test: trade.is_test,
            created_at: OffsetDateTime::now_utc(),
        };
        ledger.trades.insert(trade.tx_hash, (seq, record));
        Ok(true)
    }

    async fn get_trade(&self, tx_hash: &str) -> Result<Option<TradeRecord>, StorageError> {
        Ok(self
            .ledger
            .lock()
            .trades
            .get(tx_hash)
            .map(|(_, record)| record.clone()))
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<TradeRecord>, StorageError> {
        let ledger = self.ledger.lock();
        let mut pending: Vec<&(u64, TradeRecord)> = ledger
            .trades
            .values()
            .filter(|(_, record)| record.status == TradeStatus::Pending)
            .collect();
        pending.sort_by_key(|(seq, record)| (record.created_at, *seq));
        Ok(pending
            .into_iter()
            .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn record_attempt(
        &self,
        tx_hash: &str,
        max_attempts: i32,
    ) -> Result<Option<AttemptOutcome>, StorageError> {
        let mut ledger = self.ledger.lock();
        let Some((_, record)) = ledger.trades.get_mut(tx_hash) else {
            return Ok(None);
        };
        if record.status != TradeStatus::Pending {
            return Ok(None);
        }
        record.attempts += 1;
        if record.attempts >= max_attempts {
            record.status = TradeStatus::Timeout;
        }
        Ok(Some(AttemptOutcome {
            attempts: record.attempts,
            status: record.status,
        }))
    }

    async fn finalize(&self, finalize: Finalize) -> Result<FinalizeOutcome, StorageError> {
        let mut guard = self.ledger.lock();
        let ledger = &mut *guard;
        let Some((_, record)) = ledger.trades.get_mut(&finalize.tx_hash) else {
            return Ok(FinalizeOutcome {
                applied: false,
                credited: false,
            });
        };
        if record.status != TradeStatus::Pending {
            return Ok(FinalizeOutcome {
                applied: false,
                credited: false,
            });
        }

        record.status = finalize.status;
        record.pnl = finalize.pnl.or(record.pnl);
        record.pnl_usd = finalize.pnl_usd.or(record.pnl_usd);
        record.credit_applied = finalize.grant.is_some();

        let mut credited = false;
        if let Some(grant) = finalize.grant {
            if !ledger.grants.contains_key(&grant.tx_hash) {
                let key = (
                    grant.bot_pubkey.clone(),
                    grant.follower_pubkey.clone().unwrap_or_default(),
                );
                *ledger.credits.entry(key).or_insert(Decimal::ZERO) += grant.amount;
                ledger.grants.insert(grant.tx_hash.clone(), grant);
                credited = true;
            }
        }

        Ok(FinalizeOutcome {
            applied: true,
            credited,
        })
    }

    async fn list_credits(
        &self,
        bot_pubkey: Option<&str>,
        follower_pubkey: Option<&str>,
    ) -> Result<Vec<CreditEntry>, StorageError> {
        let ledger = self.ledger.lock();
        let mut entries: Vec<CreditEntry> = ledger
            .credits
            .iter()
            .filter(|((bot, _), _)| bot_pubkey.is_none_or(|b| b == bot))
            .filter(|((_, follower), _)| follower_pubkey.is_none_or(|f| f == follower))
            .map(|((bot, follower), credits)| CreditEntry {
                bot_pubkey: bot.clone(),
                follower_pubkey: (!follower.is_empty()).then(|| follower.clone()),
                credits: *credits,
            })
            .collect();
        // Key order already breaks ties; the sort is stable.
        entries.sort_by(|a, b| b.credits.cmp(&a.credits));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{TradeRole, TradeSide};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn new_bot(key: &str) -> NewBot {
        NewBot {
            bot_pubkey: key.to_string(),
            nostr_pubkey: format!("nostr-{key}"),
            eth_address: "0x0000000000000000000000000000000000000001".to_string(),
            name: format!("bot {key}"),
        }
    }

    fn new_trade(tx_hash: &str, bot: &str) -> NewTrade {
        NewTrade {
            tx_hash: tx_hash.to_string(),
            bot_pubkey: bot.to_string(),
            follower_pubkey: None,
            role: TradeRole::Leader,
            symbol: "BTC".to_string(),
            side: TradeSide::Buy,
            size: dec!(0.1),
            price: dec!(60000),
            is_test: false,
        }
    }

    #[tokio::test]
    async fn test_concurrent_inserts_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let now = OffsetDateTime::now_utc();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_if_absent("event-1", now).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_retention_time_then_size() {
        let store = MemoryStore::new();
        let base = OffsetDateTime::now_utc();
        for i in 0..10 {
            let seen = base + time::Duration::seconds(i);
            store.insert_if_absent(&format!("id-{i}"), seen).await.unwrap();
        }
        let purged = store
            .purge_older_than(base + time::Duration::seconds(3))
            .await
            .unwrap();
        assert_eq!(purged, 3);
        assert_eq!(store.trim_to(4).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 4);
        assert_eq!(
            store.recent_ids(2).await.unwrap(),
            vec!["id-9".to_string(), "id-8".to_string()]
        );
        assert!(!store.contains("id-5").await.unwrap());
        assert!(store.contains("id-6").await.unwrap());
    }

    #[tokio::test]
    async fn test_subscription_requires_bot() {
        let store = MemoryStore::new();
        let err = store
            .add_subscription(Subscription {
                bot_pubkey: "ghost".to_string(),
                follower_pubkey: "f".to_string(),
                shared_secret: "s".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownBot(_)));

        store.upsert_bot(new_bot("b1")).await.unwrap();
        for follower in ["f2", "f1"] {
            store
                .add_subscription(Subscription {
                    bot_pubkey: "b1".to_string(),
                    follower_pubkey: follower.to_string(),
                    shared_secret: format!("secret-{follower}"),
                })
                .await
                .unwrap();
        }
        let subs = store.list_subscriptions("b1").await.unwrap();
        let followers: Vec<_> = subs.iter().map(|s| s.follower_pubkey.as_str()).collect();
        assert_eq!(followers, vec!["f1", "f2"]);
        assert_eq!(
            store.list_follower_secrets("f2").await.unwrap(),
            vec!["secret-f2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_find_by_author_and_touch() {
        let store = MemoryStore::new();
        store.upsert_bot(new_bot("b1")).await.unwrap();
        assert!(store.find_bot_by_author("nostr-b1").await.unwrap().is_some());
        assert!(store.find_bot_by_author("b1").await.unwrap().is_some());
        assert!(store.find_bot_by_author("nobody").await.unwrap().is_none());

        let now = OffsetDateTime::now_utc();
        let window = time::Duration::minutes(15);
        assert!(store.touch_bot("b1", now, now - window).await.unwrap());
        let later = now + time::Duration::minutes(5);
        assert!(!store.touch_bot("b1", later, later - window).await.unwrap());

        // Re-registration keeps the heartbeat.
        let bot = store.upsert_bot(new_bot("b1")).await.unwrap();
        assert_eq!(bot.last_seen_at, Some(now));
    }

    #[tokio::test]
    async fn test_finalize_credits_once() {
        let store = MemoryStore::new();
        store.upsert_bot(new_bot("b1")).await.unwrap();
        assert!(store.insert_trade(new_trade("0xabc", "b1")).await.unwrap());
        assert!(!store.insert_trade(new_trade("0xabc", "b1")).await.unwrap());

        let finalize = Finalize {
            tx_hash: "0xabc".to_string(),
            status: TradeStatus::Confirmed,
            pnl: None,
            pnl_usd: Some(dec!(100)),
            grant: Some(CreditGrant {
                tx_hash: "0xabc".to_string(),
                bot_pubkey: "b1".to_string(),
                follower_pubkey: None,
                amount: dec!(0.5),
            }),
        };
        let first = store.finalize(finalize.clone()).await.unwrap();
        assert!(first.applied && first.credited);
        let second = store.finalize(finalize).await.unwrap();
        assert!(!second.applied && !second.credited);

        let credits = store.list_credits(Some("b1"), None).await.unwrap();
        assert_eq!(credits.len(), 1);
        assert_eq!(credits[0].follower_pubkey, None);
        assert_eq!(credits[0].credits, dec!(0.5));
    }

    #[tokio::test]
    async fn test_attempts_reach_timeout() {
        let store = MemoryStore::new();
        store.upsert_bot(new_bot("b1")).await.unwrap();
        store.insert_trade(new_trade("0x1", "b1")).await.unwrap();

        let first = store.record_attempt("0x1", 2).await.unwrap().unwrap();
        assert_eq!(first.status, TradeStatus::Pending);
        let second = store.record_attempt("0x1", 2).await.unwrap().unwrap();
        assert_eq!(second.status, TradeStatus::Timeout);
        assert!(store.record_attempt("0x1", 2).await.unwrap().is_none());
        assert!(store.list_pending(10).await.unwrap().is_empty());
    }
}
