//! The audit record written for each logged exchange.

use super::mask::mask_headers;
use super::session::SessionInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub const REQUEST_ID_PREFIX: &str = "req_";

/// `req_` followed by 16 lowercase hex characters.
pub fn new_request_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{REQUEST_ID_PREFIX}{}", &hex[..16])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub method: String,
    pub path: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: Value,
    pub response_status: u16,
    pub response_body: Value,
    pub is_streaming: bool,
    pub duration_ms: f64,
    pub time_to_first_byte_ms: f64,
}

impl LogEntry {
    /// The UTC calendar day this entry is partitioned under.
    pub fn date(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

/// Everything captured about one exchange, before it is shaped into a
/// [`LogEntry`].
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: bytes::Bytes,
    pub response_status: u16,
    /// Whatever was received; partial if the client went away mid-stream.
    pub response_body: bytes::Bytes,
    pub is_streaming: bool,
    pub duration_ms: f64,
    pub time_to_first_byte_ms: f64,
    pub session: SessionInfo,
}

pub fn build_log_entry(exchange: Exchange) -> LogEntry {
    LogEntry {
        id: exchange.request_id,
        timestamp: exchange.timestamp,
        session_id: exchange.session.session_id,
        conversation_id: exchange.session.conversation_id,
        method: exchange.method,
        path: exchange.path,
        request_headers: mask_headers(&exchange.request_headers),
        request_body: body_value(&exchange.request_body),
        response_status: exchange.response_status,
        response_body: body_value(&exchange.response_body),
        is_streaming: exchange.is_streaming,
        duration_ms: round_ms(exchange.duration_ms),
        time_to_first_byte_ms: round_ms(exchange.time_to_first_byte_ms),
    }
}

/// Parsed JSON when the body is well-formed, otherwise the body as lossily
/// decoded UTF-8 text.
pub fn body_value(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn round_ms(ms: f64) -> f64 {
    (ms * 100.0).round() / 100.0
}
