//! Tiered event deduplication.
//!
//! Admission consults three tiers in order: a rotating bloom filter, a
//! bounded LRU of recently admitted ids, and the durable [`DedupStore`].
//! Only the durable tier's atomic insert decides `Accepted`.
//!
//! [`DedupStore`]: crate::storage::DedupStore

mod bloom;
mod engine;

pub use bloom::{BloomFilter, RotatingBloom};
pub use engine::{Admission, DedupEngine};
