//! Trade recording, manual settlement and the credit ledger.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use mtrelay_core::entities::TradeRole;
use mtrelay_core::entities::trades::NewTrade;
use mtrelay_core::settlement::RecordOutcome;
use mtrelay_sdk::objects::ActionResponse;
use mtrelay_sdk::objects::trades::{
    CreditsQuery, CreditsResponse, RecordTradeRequest, SettlementResponse, TradeInfo,
    UpdateSettlementRequest,
};

use super::ApiError;
use super::extractors::ControlToken;
use crate::state::AppState;

/// `POST /api/trades/record`
///
/// Recording the same trade twice is accepted. A different payload under an
/// existing `tx_hash` is a conflict.
pub async fn record_trade(
    _token: ControlToken,
    State(state): State<AppState>,
    body: Result<Json<RecordTradeRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(req) = body?;
    if req.tx_hash.trim().is_empty() {
        return Err(ApiError::BadRequest("tx_hash must not be empty".to_string()));
    }
    let role: TradeRole = req.role.into();
    let follower_pubkey = match role {
        TradeRole::Leader => None,
        TradeRole::Follower => Some(req.follower_pubkey.ok_or_else(|| {
            ApiError::BadRequest("follower trades need follower_pubkey".to_string())
        })?),
    };

    let outcome = state
        .settlement
        .record_trade(NewTrade {
            tx_hash: req.tx_hash.clone(),
            bot_pubkey: req.bot_pubkey,
            follower_pubkey,
            role,
            symbol: req.symbol,
            side: req.side.into(),
            size: req.size,
            price: req.price,
            is_test: req.is_test,
        })
        .await?;

    let message = match outcome {
        RecordOutcome::Recorded => format!("trade {} recorded", req.tx_hash),
        RecordOutcome::AlreadyRecorded => format!("trade {} already recorded", req.tx_hash),
    };
    Ok(Json(ActionResponse::ok(message)))
}

/// `POST /api/trades/settlement`
pub async fn update_settlement(
    _token: ControlToken,
    State(state): State<AppState>,
    body: Result<Json<UpdateSettlementRequest>, JsonRejection>,
) -> Result<Json<SettlementResponse>, ApiError> {
    let Json(req) = body?;
    let outcome = state
        .settlement
        .update_settlement(&req.tx_hash, req.status.into(), req.pnl, req.pnl_usd)
        .await?;
    Ok(Json(SettlementResponse {
        tx_hash: req.tx_hash,
        status: outcome.status.into(),
        applied: outcome.applied,
        credit: outcome.credit,
    }))
}

/// `GET /api/trades/{tx_hash}`
pub async fn get_trade(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TradeInfo>, ApiError> {
    state
        .settlement
        .get_trade(&tx_hash)
        .await?
        .map(|trade| Json(trade.into()))
        .ok_or_else(|| ApiError::NotFound(format!("trade not found: {tx_hash}")))
}

/// `GET /api/credits`
pub async fn list_credits(
    State(state): State<AppState>,
    Query(query): Query<CreditsQuery>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let credits = state
        .settlement
        .list_credits(query.bot_pubkey.as_deref(), query.follower_pubkey.as_deref())
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(CreditsResponse { credits }))
}
