use mtrelay_sdk::objects::event::Event;
use std::sync::Arc;

/// An upstream event that passed the pool's kind and id checks.
#[derive(Debug, Clone)]
pub struct IngestedEvent {
    /// Pool-wide, strictly increasing.
    pub seq: u64,
    pub source: Arc<str>,
    pub event: Arc<Event>,
}

/// One flushed batch handed to the fanout worker.
#[derive(Debug, Clone)]
pub struct FanoutJob {
    pub events: Vec<Arc<Event>>,
}
