//! Upstream source management bodies.

use serde::{Deserialize, Serialize};

/// Body of both `POST /api/relays/add` and `DELETE /api/relays/remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayUrlRequest {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Dialing, or waiting out a backoff before the next dial.
    Connecting,
    /// Subscribed and forwarding frames.
    Connected,
    /// Too many consecutive failures. Still retried, frames not forwarded.
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub status: SourceStatus,
    pub consecutive_failures: u32,
    pub events_received: u64,
    /// Unix timestamp of the last frame (including pongs) from this source.
    pub last_frame_at: Option<i64>,
}

/// `GET /api/relays`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaysResponse {
    pub relays: Vec<SourceInfo>,
    pub count: usize,
}
