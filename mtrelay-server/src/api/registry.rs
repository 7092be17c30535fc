//! Bot registration and follower subscriptions.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use mtrelay_core::entities::bots::NewBot;
use mtrelay_core::entities::subscriptions::Subscription;
use mtrelay_sdk::objects::ActionResponse;
use mtrelay_sdk::objects::registry::{
    AddSubscriptionRequest, RegisterBotRequest, RegisterBotResponse, SubscriptionItem,
    SubscriptionsResponse,
};

use super::ApiError;
use crate::state::AppState;

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

/// `POST /api/bots/register`
pub async fn register_bot(
    State(state): State<AppState>,
    body: Result<Json<RegisterBotRequest>, JsonRejection>,
) -> Result<Json<RegisterBotResponse>, ApiError> {
    let Json(req) = body?;
    require("bot_pubkey", &req.bot_pubkey)?;
    require("nostr_pubkey", &req.nostr_pubkey)?;
    require("eth_address", &req.eth_address)?;

    let bot = state
        .stores
        .registry
        .upsert_bot(NewBot {
            bot_pubkey: req.bot_pubkey,
            nostr_pubkey: req.nostr_pubkey,
            eth_address: req.eth_address,
            name: req.name,
        })
        .await?;
    tracing::info!(bot = %bot.bot_pubkey, "Bot registered");

    Ok(Json(RegisterBotResponse {
        success: true,
        message: format!("bot {} registered", bot.bot_pubkey),
        platform_pubkey: state.platform_pubkey.as_deref().map(str::to_owned),
    }))
}

/// `POST /api/subscriptions`
pub async fn add_subscription(
    State(state): State<AppState>,
    body: Result<Json<AddSubscriptionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(req) = body?;
    require("bot_pubkey", &req.bot_pubkey)?;
    require("follower_pubkey", &req.follower_pubkey)?;
    require("shared_secret", &req.shared_secret)?;

    state
        .stores
        .registry
        .add_subscription(Subscription {
            bot_pubkey: req.bot_pubkey.clone(),
            follower_pubkey: req.follower_pubkey.clone(),
            shared_secret: req.shared_secret,
        })
        .await?;
    tracing::info!(bot = %req.bot_pubkey, follower = %req.follower_pubkey, "Subscription stored");

    Ok(Json(ActionResponse::ok("subscription stored")))
}

/// `GET /api/subscriptions/{bot_pubkey}`
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(bot_pubkey): Path<String>,
) -> Result<Json<SubscriptionsResponse>, ApiError> {
    let subscriptions = state
        .stores
        .registry
        .list_subscriptions(&bot_pubkey)
        .await?
        .into_iter()
        .map(|s| SubscriptionItem {
            follower_pubkey: s.follower_pubkey,
        })
        .collect();
    Ok(Json(SubscriptionsResponse { subscriptions }))
}
