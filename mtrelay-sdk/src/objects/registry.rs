//! Bot registration and follower subscription bodies.

use serde::{Deserialize, Serialize};

/// `POST /api/bots/register`
///
/// Upserts the bot keyed by `bot_pubkey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBotRequest {
    pub bot_pubkey: String,
    pub nostr_pubkey: String,
    pub eth_address: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBotResponse {
    pub success: bool,
    pub message: String,
    /// Public key of this relay deployment, when one is configured.
    pub platform_pubkey: Option<String>,
}

/// A registered bot as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotInfo {
    pub bot_pubkey: String,
    pub nostr_pubkey: String,
    pub eth_address: String,
    pub name: String,
    /// Unix timestamp of the last heartbeat seen from this bot.
    pub last_seen_at: Option<i64>,
}

/// `POST /api/subscriptions`
///
/// The shared secret is opaque key material. It is never returned by any
/// read endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddSubscriptionRequest {
    pub bot_pubkey: String,
    pub follower_pubkey: String,
    pub shared_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    pub follower_pubkey: String,
}

/// `GET /api/subscriptions/{bot_pubkey}`, ordered by follower key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionItem>,
}
