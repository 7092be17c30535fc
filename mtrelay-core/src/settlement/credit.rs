use crate::config::CreditPolicy;
use crate::entities::TradeRole;
use rust_decimal::Decimal;

/// Credit earned by one confirmed trade.
///
/// `max(min_credit, rate(role) * pnl_usd * profit_multiplier)`, with a
/// missing `pnl_usd` counted as zero. Losses therefore earn the minimum.
/// Paper trades get the result scaled by `test_multiplier`.
pub fn compute_credit(
    policy: &CreditPolicy,
    role: TradeRole,
    pnl_usd: Option<Decimal>,
    is_test: bool,
) -> Decimal {
    let rate = match role {
        TradeRole::Leader => policy.leader_rate,
        TradeRole::Follower => policy.follower_rate,
    };
    let earned = rate * pnl_usd.unwrap_or(Decimal::ZERO) * policy.profit_multiplier;
    let credit = earned.max(policy.min_credit);
    if is_test {
        credit * policy.test_multiplier
    } else {
        credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_leader_profit() {
        let policy = CreditPolicy::default();
        // 0.002 * 25000 * 1.2
        assert_eq!(
            compute_credit(&policy, TradeRole::Leader, Some(dec!(25000)), false),
            dec!(60)
        );
    }

    #[test]
    fn test_follower_rate_applies() {
        let policy = CreditPolicy::default();
        assert_eq!(
            compute_credit(&policy, TradeRole::Follower, Some(dec!(25000)), false),
            dec!(30)
        );
    }

    #[test]
    fn test_floor_for_small_missing_or_negative_pnl() {
        let policy = CreditPolicy::default();
        assert_eq!(compute_credit(&policy, TradeRole::Leader, Some(dec!(10)), false), dec!(0.5));
        assert_eq!(compute_credit(&policy, TradeRole::Leader, None, false), dec!(0.5));
        assert_eq!(
            compute_credit(&policy, TradeRole::Follower, Some(dec!(-500)), false),
            dec!(0.5)
        );
    }

    #[test]
    fn test_paper_trades_scaled_after_floor() {
        let mut policy = CreditPolicy::default();
        assert_eq!(
            compute_credit(&policy, TradeRole::Leader, Some(dec!(25000)), true),
            Decimal::ZERO
        );
        policy.test_multiplier = dec!(0.1);
        assert_eq!(
            compute_credit(&policy, TradeRole::Leader, Some(dec!(25000)), true),
            dec!(6)
        );
        // 0.5 floor, then scaled.
        assert_eq!(compute_credit(&policy, TradeRole::Follower, None, true), dec!(0.05));
    }
}
