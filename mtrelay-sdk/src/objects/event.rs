//! The upstream event envelope.
//!
//! Events are immutable once received. The `id` is a content fingerprint:
//! the lowercase hex SHA-256 of the canonical array
//! `[0, pubkey, created_at, kind, tags, content]`, and it is the key every
//! deduplication tier uses.

use serde::{Deserialize, Serialize};

/// Well-known event kinds carried by the relay.
pub struct EventKind;

impl EventKind {
    /// Encrypted trade signal published by a leader bot.
    pub const TRADE_SIGNAL: u16 = 30931;
    /// Copy-trade intent.
    pub const COPYTRADE_INTENT: u16 = 30932;
    /// Bot liveness heartbeat.
    pub const HEARTBEAT: u16 = 30933;
    /// Execution report carrying a transaction hash.
    pub const EXECUTION_REPORT: u16 = 30934;
    /// Plaintext agent registration.
    pub const AGENT_REGISTER: u16 = 30935;

    /// Kinds accepted when the configuration does not name any.
    pub const DEFAULT_ALLOWED: [u16; 5] = [
        Self::TRADE_SIGNAL,
        Self::COPYTRADE_INTENT,
        Self::HEARTBEAT,
        Self::EXECUTION_REPORT,
        Self::AGENT_REGISTER,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "pubkey")]
    pub author_key: String,
    pub created_at: i64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(rename = "content")]
    pub payload: String,
    #[serde(rename = "sig")]
    pub signature: String,
}

impl Event {
    /// Compute the content fingerprint of this event.
    pub fn compute_id(&self) -> String {
        let canonical = serde_json::json!([
            0,
            self.author_key,
            self.created_at,
            self.kind,
            self.tags,
            self.payload,
        ]);
        let digest = ring::digest::digest(&ring::digest::SHA256, canonical.to_string().as_bytes());
        hex::encode(digest.as_ref())
    }

    /// Returns `true` if the carried `id` matches the content.
    pub fn has_valid_id(&self) -> bool {
        self.id.eq_ignore_ascii_case(&self.compute_id())
    }

    /// Seconds elapsed between `created_at` and `now` (zero for future events).
    pub fn age_secs(&self, now: i64) -> u64 {
        now.saturating_sub(self.created_at).max(0) as u64
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) fn sample_event(author_key: &str, kind: u16, created_at: i64, payload: &str) -> Event {
    let mut event = Event {
        id: String::new(),
        author_key: author_key.to_string(),
        created_at,
        kind,
        tags: vec![vec!["p".to_string(), "follower".to_string()]],
        payload: payload.to_string(),
        signature: "00".repeat(64),
    };
    event.id = event.compute_id();
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_content_derived() {
        let event = sample_event("ab".repeat(32).as_str(), EventKind::HEARTBEAT, 1_700_000_000, "hi");
        assert_eq!(event.id.len(), 64);
        assert!(event.has_valid_id());

        let mut tampered = event.clone();
        tampered.payload = "bye".to_string();
        assert!(!tampered.has_valid_id());
    }

    #[test]
    fn test_wire_field_names() {
        let event = sample_event("cd".repeat(32).as_str(), EventKind::TRADE_SIGNAL, 10, "x");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("pubkey").is_some());
        assert!(json.get("content").is_some());
        assert!(json.get("sig").is_some());
        assert!(json.get("author_key").is_none());

        let parsed: Event = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_tag_value_and_age() {
        let event = sample_event("ef".repeat(32).as_str(), EventKind::HEARTBEAT, 100, "");
        assert_eq!(event.tag_value("p"), Some("follower"));
        assert_eq!(event.tag_value("e"), None);
        assert_eq!(event.age_secs(160), 60);
        assert_eq!(event.age_secs(50), 0);
    }
}
