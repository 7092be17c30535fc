//! Downstream websocket frames.
//!
//! `GET /ws` streams every admitted event. `GET /ws/fanout` streams only the
//! sealed payloads addressed to the authenticated follower. Both push
//! [`StreamMessage`] JSON text frames:
//!
//! ```json
//! {"type":"event","event":{ ... }}
//! {"type":"fanout","message":{ ... }}
//! {"type":"gap","dropped":12}
//! ```
//!
//! A `gap` frame means the connection's outbound queue overflowed and the
//! oldest `dropped` frames were discarded. It is sent before the next
//! frame that survived.

use serde::{Deserialize, Serialize};

use super::event::Event;

/// A payload sealed for one follower of one bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutMessage {
    pub bot_pubkey: String,
    pub follower_pubkey: String,
    /// Id of the upstream event this payload was derived from.
    pub event_id: String,
    pub kind: u16,
    pub created_at: i64,
    /// Base64 of `nonce || ciphertext`.
    pub sealed_payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Event { event: Event },
    Fanout { message: FanoutMessage },
    Gap { dropped: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_layout() {
        let gap = serde_json::to_string(&StreamMessage::Gap { dropped: 3 }).unwrap();
        assert_eq!(gap, r#"{"type":"gap","dropped":3}"#);

        let fanout = StreamMessage::Fanout {
            message: FanoutMessage {
                bot_pubkey: "bot".to_string(),
                follower_pubkey: "f1".to_string(),
                event_id: "id".to_string(),
                kind: 30931,
                created_at: 1,
                sealed_payload: "AAAA".to_string(),
            },
        };
        let value = serde_json::to_value(&fanout).unwrap();
        assert_eq!(value["type"], "fanout");
        assert_eq!(value["message"]["follower_pubkey"], "f1");
    }
}
