/// Exponential backoff: `min(2^failures, max)` seconds.
pub fn reconnect_delay(consecutive_failures: u32, max: std::time::Duration) -> std::time::Duration {
    let seconds = 2u64.saturating_pow(consecutive_failures.min(63));
    std::time::Duration::from_secs(seconds).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reconnect_delay_calculation() {
        let max = Duration::from_secs(60);
        assert_eq!(reconnect_delay(0, max), Duration::from_secs(1));
        assert_eq!(reconnect_delay(1, max), Duration::from_secs(2));
        assert_eq!(reconnect_delay(5, max), Duration::from_secs(32));
        assert_eq!(reconnect_delay(6, max), max);
        assert_eq!(reconnect_delay(u32::MAX, max), max);
    }
}
