//! Payloads returned inside the REST success envelope.

use serde::{Deserialize, Serialize};

use super::TimestampMs;

/// Payload of `GET /timestamp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    /// Server clock in milliseconds
    pub server_time_milli: TimestampMs,
}

/// Payload of `POST /user/trading/listen-key`
///
/// The listen key is the stream key passed to
/// [`WebSocketSession::connect`](crate::client::WebSocketSession::connect).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenKey {
    /// Stream key
    pub listen_key: String,
    /// Expiry as reported by the server
    pub expire_at: String,
    /// Whether the key was issued
    pub success: bool,
    /// Server message
    pub message: String,
}
