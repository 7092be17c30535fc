//! Plaintext JSON carried in the `content` of agent events.

use super::trades::{TradeRole, TradeSide};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Content of an agent registration event (kind 30935).
///
/// Missing keys fall back to the event author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    #[serde(default)]
    pub bot_pubkey: Option<String>,
    #[serde(default)]
    pub nostr_pubkey: Option<String>,
    #[serde(alias = "account")]
    pub eth_address: String,
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_name() -> String {
    "agent".to_string()
}

/// Content of an execution report (kind 30934).
///
/// A report carrying a `tx_hash` records a pending trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub role: Option<TradeRole>,
    #[serde(default, alias = "follower")]
    pub follower_pubkey: Option<String>,
    pub symbol: String,
    pub side: TradeSide,
    pub size: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl ExecutionReport {
    /// Paper trades: flagged `test_mode` or reported as `simulated`.
    pub fn is_test(&self) -> bool {
        self.test_mode
            || self
                .status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case("simulated"))
    }
}
