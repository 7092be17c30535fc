//! Upstream relay frames.
//!
//! Relays speak JSON arrays whose first element names the frame type. Only
//! the frames needed to hold a subscription open are modelled here:
//!
//! ```text
//! client -> relay   ["REQ", sub_id, filter]   ["CLOSE", sub_id]
//! relay -> client   ["EVENT", sub_id, event]  ["EOSE", sub_id]
//!                   ["NOTICE", message]       ["CLOSED", sub_id, message]
//!                   ["OK", event_id, accepted, message]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::Event;

/// Subscription filter sent inside a `REQ` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Frame sent from the relay service to an upstream relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Req {
        subscription_id: String,
        filter: SubscriptionFilter,
    },
    Close {
        subscription_id: String,
    },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let value = match self {
            Self::Req {
                subscription_id,
                filter,
            } => serde_json::json!(["REQ", subscription_id, filter]),
            Self::Close { subscription_id } => serde_json::json!(["CLOSE", subscription_id]),
        };
        serde_json::to_string(&value)
    }
}

/// Frame received from an upstream relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    EndOfStoredEvents {
        subscription_id: String,
    },
    Notice {
        message: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RelayMessageError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a non-empty array")]
    NotAnArray,
    #[error("unknown frame type {0}")]
    UnknownType(String),
    #[error("missing or malformed field {0}")]
    MissingField(&'static str),
}

fn string_at(items: &[Value], index: usize, name: &'static str) -> Result<String, RelayMessageError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(RelayMessageError::MissingField(name))
}

/// Optional trailing message; relays frequently omit it.
fn message_at(items: &[Value], index: usize) -> String {
    items
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self, RelayMessageError> {
        let value: Value = serde_json::from_str(text)?;
        let items = value.as_array().ok_or(RelayMessageError::NotAnArray)?;
        let kind = items
            .first()
            .and_then(Value::as_str)
            .ok_or(RelayMessageError::NotAnArray)?;
        match kind {
            "EVENT" => {
                let subscription_id = string_at(items, 1, "subscription_id")?;
                let raw = items
                    .get(2)
                    .cloned()
                    .ok_or(RelayMessageError::MissingField("event"))?;
                let event: Event = serde_json::from_value(raw)?;
                Ok(Self::Event {
                    subscription_id,
                    event: Box::new(event),
                })
            }
            "EOSE" => Ok(Self::EndOfStoredEvents {
                subscription_id: string_at(items, 1, "subscription_id")?,
            }),
            "NOTICE" => Ok(Self::Notice {
                message: message_at(items, 1),
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(items, 1, "subscription_id")?,
                message: message_at(items, 2),
            }),
            "OK" => Ok(Self::Ok {
                event_id: string_at(items, 1, "event_id")?,
                accepted: items
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or(RelayMessageError::MissingField("accepted"))?,
                message: message_at(items, 3),
            }),
            other => Err(RelayMessageError::UnknownType(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::event::{sample_event, EventKind};

    #[test]
    fn test_req_frame_layout() {
        let frame = ClientMessage::Req {
            subscription_id: "sub-1".to_string(),
            filter: SubscriptionFilter {
                kinds: vec![EventKind::TRADE_SIGNAL, EventKind::HEARTBEAT],
                ..Default::default()
            },
        };
        let json = frame.to_json().unwrap();
        assert_eq!(json, r#"["REQ","sub-1",{"kinds":[30931,30933]}]"#);
    }

    #[test]
    fn test_parse_event_frame() {
        let event = sample_event(&"aa".repeat(32), EventKind::TRADE_SIGNAL, 42, "payload");
        let text = serde_json::json!(["EVENT", "sub-1", event]).to_string();
        match RelayMessage::parse(&text).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event: parsed,
            } => {
                assert_eq!(subscription_id, "sub-1");
                assert_eq!(*parsed, event);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(
            RelayMessage::parse(r#"["EOSE","s"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents {
                subscription_id: "s".to_string()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice {
                message: "slow down".to_string()
            }
        );
        assert_eq!(
            RelayMessage::parse(r#"["CLOSED","s"]"#).unwrap(),
            RelayMessage::Closed {
                subscription_id: "s".to_string(),
                message: String::new()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            RelayMessage::parse("{}"),
            Err(RelayMessageError::NotAnArray)
        ));
        assert!(matches!(
            RelayMessage::parse(r#"["AUTH","challenge"]"#),
            Err(RelayMessageError::UnknownType(_))
        ));
        assert!(matches!(
            RelayMessage::parse(r#"["EVENT","s"]"#),
            Err(RelayMessageError::MissingField("event"))
        ));
        assert!(RelayMessage::parse("not json").is_err());
    }
}
