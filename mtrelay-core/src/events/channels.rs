//! Event channel factories and handles.

use super::types::{FanoutJob, IngestedEvent};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Ingest carries every upstream frame, so it gets more headroom.
const INGEST_CHANNEL_BUFFER: usize = DEFAULT_CHANNEL_BUFFER * 16;

pub type IngestSender = mpsc::Sender<IngestedEvent>;
pub type IngestReceiver = mpsc::Receiver<IngestedEvent>;

pub type FanoutJobSender = mpsc::Sender<FanoutJob>;
pub type FanoutJobReceiver = mpsc::Receiver<FanoutJob>;

/// Shared by every connection task of the relay pool.
pub fn ingest_channel() -> (IngestSender, IngestReceiver) {
    mpsc::channel(INGEST_CHANNEL_BUFFER)
}

/// Router to fanout worker. The router never waits on it.
pub fn fanout_job_channel() -> (FanoutJobSender, FanoutJobReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}
