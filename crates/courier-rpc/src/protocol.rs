//! JSON-RPC 2.0 message shapes and classification of inbound lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Serialized request followed by the line terminator.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A server-initiated message without an id.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcNotification {
    pub method: String,
    pub params: Value,
}

/// What one stdout line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Response {
        id: u64,
        outcome: Result<Value, RpcErrorObject>,
    },
    Notification(RpcNotification),
    /// Valid JSON that is neither of the above (e.g. a server-side request).
    Other,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Classify a line: an `id` without `method` is a response, a `method`
/// without `id` is a notification.
pub fn classify(line: &str) -> serde_json::Result<Inbound> {
    let raw: RawMessage = serde_json::from_str(line)?;

    Ok(match (raw.id, raw.method) {
        (Some(id), None) => match response_id(&id) {
            Some(id) => Inbound::Response {
                id,
                outcome: match raw.error {
                    Some(err) => Err(err),
                    None => Ok(raw.result.unwrap_or(Value::Null)),
                },
            },
            None => Inbound::Other,
        },
        (None, Some(method)) => Inbound::Notification(RpcNotification {
            method,
            params: raw.params.unwrap_or(Value::Null),
        }),
        _ => Inbound::Other,
    })
}

/// Ids are sent as integers; some servers echo them back as strings.
fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
