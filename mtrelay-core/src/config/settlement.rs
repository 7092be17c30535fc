use rust_decimal::Decimal;
use std::time::Duration;
use url::Url;

/// Settlement worker settings.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Verification requests go to `{explorer_base}/{tx_hash}`.
    pub explorer_base: Url,
    pub poll_interval: Duration,
    pub batch_limit: i64,
    /// Verification attempts before a pending trade times out.
    pub max_attempts: i32,
    pub request_timeout: Duration,
}

/// Credit issued per confirmed trade:
/// `max(min_credit, rate(role) * pnl_usd * profit_multiplier)`, scaled by
/// `test_multiplier` for paper trades.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditPolicy {
    pub leader_rate: Decimal,
    pub follower_rate: Decimal,
    pub min_credit: Decimal,
    pub profit_multiplier: Decimal,
    pub test_multiplier: Decimal,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            leader_rate: Decimal::new(2, 3),
            follower_rate: Decimal::new(1, 3),
            min_credit: Decimal::new(5, 1),
            profit_multiplier: Decimal::new(12, 1),
            // Paper trades earn nothing unless configured.
            test_multiplier: Decimal::ZERO,
        }
    }
}
