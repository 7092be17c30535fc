//! Long-running tasks of the relay.
//!
//! - `RelayPool`: one connection task per upstream source, emits `IngestedEvent`
//! - `EventRouter`: receives `IngestedEvent`, publishes the global feed, emits `FanoutJob`
//! - `FanoutWorker`: receives `FanoutJob`, publishes sealed per-follower payloads
//! - `SettlementWorker`: polls pending trades against the verifier
//! - `RetentionSweeper`: keeps the durable dedup store inside its horizon

pub mod event_router;
pub mod fanout;
pub mod relay_pool;
pub mod retention;
pub mod settlement_worker;

pub use event_router::EventRouter;
pub use fanout::{FanoutError, FanoutWorker};
pub use relay_pool::{parse_source_url, PoolError, RelayPool};
pub use retention::{RetentionSweeper, SweepReport};
pub use settlement_worker::SettlementWorker;
