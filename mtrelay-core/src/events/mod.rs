//! Channels linking the pipeline stages.
//!
//! # Event Flow
//!
//! 1. `RelayPool` connection tasks emit `IngestedEvent` -> `EventRouter`
//! 2. `EventRouter` admits through the dedup engine, batches, publishes the
//!    global feed to the `StreamHub` and emits `FanoutJob` -> `FanoutWorker`
//! 3. `FanoutWorker` seals per-follower payloads and publishes them to the
//!    `StreamHub`
//!
//! The settlement worker is independent and polls the ledger instead.

pub mod channels;
pub mod types;

pub use channels::{
    fanout_job_channel, ingest_channel, FanoutJobReceiver, FanoutJobSender, IngestReceiver,
    IngestSender, DEFAULT_CHANNEL_BUFFER,
};

pub use types::{FanoutJob, IngestedEvent};
