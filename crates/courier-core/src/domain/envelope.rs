//! Envelope - Pub/Sub で運搬されるメッセージ
//!
//! ワイヤ形式は JSON テキスト:
//! - 呼び出し: `{"type": "<pattern>", "payload": {...}}`
//! - 完了: `{"type": "<pattern>:on_completed", "payload": <result>}`
//! - エラー: `{"type": "<pattern>:on_error", "error": "<message>"}`
//!
//! 追加のトップレベルキーはそのまま handler の引数にマージされる。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: String,

    /// `Some(Value::Null)` and an absent key are different on the wire.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(d).map(Some)
}

impl Envelope {
    /// `{type: pattern, payload: args}`
    pub fn invocation(pattern: &str, args: Map<String, Value>) -> Self {
        Self {
            kind: pattern.to_string(),
            payload: Some(Value::Object(args)),
            error: None,
            extra: Map::new(),
        }
    }

    /// `{type: result_channel, payload: result}`
    pub fn completed(result_channel: &str, payload: Value) -> Self {
        Self {
            kind: result_channel.to_string(),
            payload: Some(payload),
            error: None,
            extra: Map::new(),
        }
    }

    /// `{type: error_channel, error: message}`
    pub fn failed(error_channel: &str, message: impl Into<String>) -> Self {
        Self {
            kind: error_channel.to_string(),
            payload: None,
            error: Some(message.into()),
            extra: Map::new(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse the raw message body. Any JSON value is accepted.
pub fn decode(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

/// Normalize an inbound body into envelope shape.
///
/// A mapping is layered over `{type: "", payload: {}}`; anything else is
/// wrapped as `{type: "", payload: <value>}`.
pub fn normalize(raw: &Value) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("type".to_string(), Value::String(String::new()));
    match raw {
        Value::Object(fields) => {
            data.insert("payload".to_string(), Value::Object(Map::new()));
            data.extend(fields.clone());
        }
        other => {
            data.insert("payload".to_string(), other.clone());
        }
    }
    data
}

/// Build handler arguments, lowest precedence first: the inner payload
/// mapping, the raw body mapping, then the normalized envelope.
pub fn merge_arguments(raw: &Value, normalized: &Map<String, Value>) -> Map<String, Value> {
    let mut args = Map::new();
    if let Some(Value::Object(inner)) = normalized.get("payload") {
        args.extend(inner.clone());
    }
    if let Value::Object(fields) = raw {
        args.extend(fields.clone());
    }
    args.extend(normalized.clone());
    args
}
