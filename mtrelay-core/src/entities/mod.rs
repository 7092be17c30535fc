//! Persisted records and the database commands that operate on them.
//!
//! Each command is a struct with a `Processor<Command> for DatabaseProcessor`
//! impl. Multi-statement operations that must commit together are plain
//! functions taking `&mut sqlx::Transaction`.

pub mod bots;
pub mod credits;
pub mod dedup_records;
pub mod subscriptions;
pub mod trades;

use mtrelay_sdk::objects::trades::{
    TradeRole as SdkTradeRole, TradeSide as SdkTradeSide, TradeStatus as SdkTradeStatus,
};

/// Trade role for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see
/// `mtrelay_sdk::objects::trades::TradeRole`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "trade_role")]
pub enum TradeRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "trade_side")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Settlement state of a trade.
///
/// Transitions only `Pending -> {Confirmed, Failed, Timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "trade_status")]
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

impl From<TradeRole> for SdkTradeRole {
    fn from(value: TradeRole) -> Self {
        match value {
            TradeRole::Leader => SdkTradeRole::Leader,
            TradeRole::Follower => SdkTradeRole::Follower,
        }
    }
}

impl From<SdkTradeRole> for TradeRole {
    fn from(value: SdkTradeRole) -> Self {
        match value {
            SdkTradeRole::Leader => TradeRole::Leader,
            SdkTradeRole::Follower => TradeRole::Follower,
        }
    }
}

impl From<TradeSide> for SdkTradeSide {
    fn from(value: TradeSide) -> Self {
        match value {
            TradeSide::Buy => SdkTradeSide::Buy,
            TradeSide::Sell => SdkTradeSide::Sell,
        }
    }
}

impl From<SdkTradeSide> for TradeSide {
    fn from(value: SdkTradeSide) -> Self {
        match value {
            SdkTradeSide::Buy => TradeSide::Buy,
            SdkTradeSide::Sell => TradeSide::Sell,
        }
    }
}

impl From<TradeStatus> for SdkTradeStatus {
    fn from(value: TradeStatus) -> Self {
        match value {
            TradeStatus::Pending => SdkTradeStatus::Pending,
            TradeStatus::Confirmed => SdkTradeStatus::Confirmed,
            TradeStatus::Failed => SdkTradeStatus::Failed,
            TradeStatus::Timeout => SdkTradeStatus::Timeout,
        }
    }
}

impl From<SdkTradeStatus> for TradeStatus {
    fn from(value: SdkTradeStatus) -> Self {
        match value {
            SdkTradeStatus::Pending => TradeStatus::Pending,
            SdkTradeStatus::Confirmed => TradeStatus::Confirmed,
            SdkTradeStatus::Failed => TradeStatus::Failed,
            SdkTradeStatus::Timeout => TradeStatus::Timeout,
        }
    }
}
