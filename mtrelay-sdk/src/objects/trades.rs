//! Trade recording, settlement and credit ledger bodies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Settlement state of a recorded trade.
///
/// `Pending` is the only non-terminal state. A trade leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Confirmed,
    Failed,
    Timeout,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// `POST /api/trades/record`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTradeRequest {
    pub bot_pubkey: String,
    #[serde(default)]
    pub follower_pubkey: Option<String>,
    pub role: TradeRole,
    pub symbol: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub tx_hash: String,
    /// Paper trade, credited at `test_multiplier`.
    #[serde(default)]
    pub is_test: bool,
}

/// `POST /api/trades/settlement`
///
/// Only terminal statuses are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettlementRequest {
    pub tx_hash: String,
    pub status: TradeStatus,
    #[serde(default)]
    pub pnl: Option<Decimal>,
    #[serde(default)]
    pub pnl_usd: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementResponse {
    pub tx_hash: String,
    pub status: TradeStatus,
    /// `false` when the trade was already terminal and nothing changed.
    pub applied: bool,
    /// Credit granted by this transition, if any.
    pub credit: Option<Decimal>,
}

/// `GET /api/trades/{tx_hash}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInfo {
    pub tx_hash: String,
    pub bot_pubkey: String,
    pub follower_pubkey: Option<String>,
    pub role: TradeRole,
    pub symbol: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    pub status: TradeStatus,
    pub pnl: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    pub attempts: i32,
    pub credit_applied: bool,
    pub is_test: bool,
}

/// Query string of `GET /api/credits`. Both filters are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsQuery {
    pub bot_pubkey: Option<String>,
    pub follower_pubkey: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditItem {
    pub bot_pubkey: String,
    /// `None` for the leader's own credit.
    pub follower_pubkey: Option<String>,
    pub credits: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsResponse {
    pub credits: Vec<CreditItem>,
}
