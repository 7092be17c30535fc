//! HTTP control surface and websocket streams.
//!
//! # Endpoints
//!
//! - `POST   /api/bots/register`               – upsert a bot
//! - `POST   /api/subscriptions`               – upsert a follower subscription
//! - `GET    /api/subscriptions/{bot_pubkey}`  – list a bot's followers
//! - `POST   /api/trades/record`               – record a pending trade (control token)
//! - `POST   /api/trades/settlement`           – settle a trade manually (control token)
//! - `GET    /api/trades/{tx_hash}`            – show one trade
//! - `GET    /api/credits`                     – query the credit ledger
//! - `GET    /api/relays`                      – list upstream sources
//! - `POST   /api/relays/add`                  – add a source (control token)
//! - `DELETE /api/relays/remove`               – remove a source (control token)
//! - `GET    /api/metrics/summary`             – pipeline counters
//! - `GET    /metrics`                         – the same counters, Prometheus text format
//! - `GET    /health`, `GET /status`
//! - `GET    /ws`, `GET /ws/fanout`            – downstream streams

pub mod extractors;
mod registry;
mod relays;
mod status;
mod stream;
mod trades;

use axum::{
    Json, Router,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use mtrelay_core::processors::PoolError;
use mtrelay_core::settlement::SettlementError;
use mtrelay_core::storage::StorageError;
use mtrelay_sdk::objects::ErrorResponse;

use crate::state::AppState;

/// Routes mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bots/register", post(registry::register_bot))
        .route("/subscriptions", post(registry::add_subscription))
        .route("/subscriptions/{bot_pubkey}", get(registry::list_subscriptions))
        .route("/trades/record", post(trades::record_trade))
        .route("/trades/settlement", post(trades::update_settlement))
        .route("/trades/{tx_hash}", get(trades::get_trade))
        .route("/credits", get(trades::list_credits))
        .route("/relays", get(relays::list_relays))
        .route("/relays/add", post(relays::add_relay))
        .route("/relays/remove", delete(relays::remove_relay))
        .route("/metrics/summary", get(status::metrics_summary))
}

/// Routes mounted at the root.
pub fn root_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/metrics", get(status::prometheus))
        .route("/ws", get(stream::global_feed))
        .route("/ws/fanout", get(stream::follower_fanout))
}

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

/// Errors that can occur in API handlers. Rendered as `{ "error": "..." }`.
#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Unavailable(String),
    /// An extractor rejected the request with its own status.
    Rejected(StatusCode, String),
    Storage(StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Rejected(status, m) => (status, m),
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "API storage error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage unavailable".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::UnknownBot(bot) => ApiError::Unprocessable(format!("unknown bot: {bot}")),
            other => ApiError::Storage(other),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        match e {
            SettlementError::Storage(inner) => inner.into(),
            SettlementError::UnknownBot(_) => ApiError::Unprocessable(e.to_string()),
            SettlementError::TradeConflict(_) => ApiError::Conflict(e.to_string()),
            SettlementError::TradeNotFound(_) => ApiError::NotFound(e.to_string()),
            SettlementError::NotTerminal => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::InvalidUrl(_) => ApiError::BadRequest(e.to_string()),
            PoolError::AlreadyManaged(_) => ApiError::Conflict(e.to_string()),
            PoolError::CapacityReached(_) => ApiError::Unavailable(e.to_string()),
            PoolError::NotManaged(_) => ApiError::NotFound(e.to_string()),
        }
    }
}
