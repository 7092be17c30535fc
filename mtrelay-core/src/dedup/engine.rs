use super::bloom::RotatingBloom;
use crate::config::DedupConfig;
use crate::storage::{DedupStore, StorageError};
use lru::LruCache;
use mtrelay_sdk::objects::status::DedupStats;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// Exactly-once admission over a bloom filter, an LRU cache and the durable
/// store.
///
/// The volatile tiers only ever short-circuit to `Duplicate` for ids they
/// have actually been told about, so losing them (restart, rotation,
/// eviction) costs a durable lookup but never a wrong answer.
pub struct DedupEngine {
    bloom: Mutex<RotatingBloom>,
    cache: Mutex<LruCache<String, ()>>,
    store: Arc<dyn DedupStore>,
}

impl DedupEngine {
    pub fn new(config: &DedupConfig, store: Arc<dyn DedupStore>) -> Self {
        let lru_size = NonZeroUsize::new(config.lru_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            bloom: Mutex::new(RotatingBloom::new(config.bloom_capacity, config.bloom_fp_rate)),
            cache: Mutex::new(LruCache::new(lru_size)),
            store,
        }
    }

    /// Decide whether `event_id` is new.
    ///
    /// `Accepted` is returned only after the durable insert committed.
    pub async fn admit(&self, event_id: &str) -> Result<Admission, StorageError> {
        if self.recently_seen(event_id) {
            return Ok(Admission::Duplicate);
        }

        let inserted = self
            .store
            .insert_if_absent(event_id, OffsetDateTime::now_utc())
            .await?;
        self.promote(event_id);

        if inserted {
            Ok(Admission::Accepted)
        } else {
            debug!(event_id, "Durable tier reported duplicate");
            Ok(Admission::Duplicate)
        }
    }

    /// Bloom negative skips the cache. Bloom positive defers to the cache.
    fn recently_seen(&self, event_id: &str) -> bool {
        if !self.bloom.lock().contains(event_id) {
            return false;
        }
        self.cache.lock().get(event_id).is_some()
    }

    fn promote(&self, event_id: &str) {
        self.bloom.lock().insert(event_id);
        self.cache.lock().put(event_id.to_owned(), ());
    }

    /// Preload the newest durable ids into the volatile tiers.
    pub async fn warm(&self, limit: usize) -> Result<usize, StorageError> {
        if limit == 0 {
            return Ok(0);
        }
        let ids = self.store.recent_ids(limit).await?;
        // Oldest first so the newest ids end up most recently used.
        for id in ids.iter().rev() {
            self.promote(id);
        }
        info!(count = ids.len(), "Warmed deduplication tiers");
        Ok(ids.len())
    }

    pub async fn stats(&self) -> Result<DedupStats, StorageError> {
        let bloom_filter_size = self.bloom.lock().len();
        let lru_cache_size = self.cache.lock().len() as u64;
        let durable_entry_count = self.store.count().await?;
        Ok(DedupStats {
            bloom_filter_size,
            lru_cache_size,
            durable_entry_count,
        })
    }
}
