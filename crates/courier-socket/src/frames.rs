use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// One gateway frame in either direction.
/// Wire: `{ "op": 0, "d": {...}, "s": 42, "t": "MESSAGE_CREATE" }`
///
/// `s` and `t` are only present on dispatch frames (`op == 0`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    fn new(op: u8, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Client identify: credentials plus the intent bitmask.
    pub fn identify(token: &str, intents: u64) -> Self {
        Self::new(
            OP_IDENTIFY,
            json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "courier",
                    "device": "courier",
                },
            }),
        )
    }

    /// Heartbeat carrying the last seen sequence number, or `null` before any dispatch.
    pub fn heartbeat(last_seq: Option<u64>) -> Self {
        Self::new(OP_HEARTBEAT, json!(last_seq))
    }

    /// Server hello. Only built by tests and in-process peers.
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(
            OP_HELLO,
            json!({ "heartbeat_interval": heartbeat_interval_ms }),
        )
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(OP_HEARTBEAT_ACK, Value::Null)
    }

    pub fn dispatch(seq: u64, event: impl Into<String>, d: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            d,
            s: Some(seq),
            t: Some(event.into()),
        }
    }

    /// `heartbeat_interval` in milliseconds, when this is a well-formed hello.
    pub fn heartbeat_interval(&self) -> Option<u64> {
        if self.op != OP_HELLO {
            return None;
        }
        self.d.get("heartbeat_interval").and_then(Value::as_u64)
    }

    pub fn to_text(&self) -> String {
        // A frame built from `Value`s always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_without_sequence_is_null() {
        let text = GatewayFrame::heartbeat(None).to_text();
        assert_eq!(text, r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn heartbeat_carries_sequence() {
        let text = GatewayFrame::heartbeat(Some(42)).to_text();
        assert_eq!(text, r#"{"op":1,"d":42}"#);
    }

    #[test]
    fn hello_interval_is_read() {
        let frame: GatewayFrame =
            serde_json::from_str(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(frame.heartbeat_interval(), Some(41250));
    }

    #[test]
    fn interval_ignored_on_other_opcodes() {
        let frame = GatewayFrame::dispatch(1, "READY", json!({"heartbeat_interval": 5}));
        assert_eq!(frame.heartbeat_interval(), None);
    }
}
