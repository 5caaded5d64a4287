//! User event stream message types.
//!
//! Push messages arrive as two nested JSON documents. The outer
//! [`PushEnvelope`] names a message kind and carries `data` as a string; for
//! `master_data` and `order_data` that string is itself a JSON document whose
//! own `type` field ([`ThirdPartyEnvelope`]) selects the concrete event.
//!
//! ```json
//! {"type":"order_data","messageId":"m1","userId":"u1",
//!  "data":"{\"type\":\"fill\",\"order_id\":\"o1\",\"filled_qty\":1.5}"}
//! ```

use serde::{Deserialize, Serialize};

use super::TimestampMs;

/// Outer push message
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushEnvelope {
    /// Message kind tag (`status`, `error`, `master_data`, `order_data`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Message ID
    pub message_id: String,
    /// Owner of the stream
    pub user_id: String,
    /// Payload; JSON text for `master_data` and `order_data`
    pub data: String,
}

impl PushEnvelope {
    /// Classify the outer kind tag
    pub fn push_kind(&self) -> PushKind {
        PushKind::from_tag(&self.kind)
    }
}

/// Outer message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    /// Stream status text
    Status,
    /// Server-side error text
    Error,
    /// Master order update (inner envelope in `data`)
    MasterData,
    /// Child order or fill update (inner envelope in `data`)
    OrderData,
    /// Any tag this client does not know
    Unknown,
}

impl PushKind {
    /// Map a wire tag to a kind
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "status" => PushKind::Status,
            "error" => PushKind::Error,
            "master_data" => PushKind::MasterData,
            "order_data" => PushKind::OrderData,
            _ => PushKind::Unknown,
        }
    }

    /// Whether `data` carries an inner envelope
    pub fn has_inner_envelope(self) -> bool {
        matches!(self, PushKind::MasterData | PushKind::OrderData)
    }
}

/// Inner envelope: only the tag, read before the full decode
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThirdPartyEnvelope {
    /// Inner kind tag (`master_order`, `order`, `fill`)
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ThirdPartyEnvelope {
    /// Classify the inner kind tag
    pub fn inner_kind(&self) -> InnerKind {
        InnerKind::from_tag(&self.kind)
    }
}

/// Inner message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerKind {
    /// [`MasterOrderEvent`]
    MasterOrder,
    /// [`OrderEvent`]
    Order,
    /// [`FillEvent`]
    Fill,
    /// Any tag this client does not know
    Unknown,
}

impl InnerKind {
    /// Map a wire tag to a kind
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "master_order" => InnerKind::MasterOrder,
            "order" => InnerKind::Order,
            "fill" => InnerKind::Fill,
            _ => InnerKind::Unknown,
        }
    }
}

/// Master order update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterOrderEvent {
    /// Master order ID
    pub master_order_id: String,
    /// Client-assigned ID
    pub client_id: String,
    /// Algorithm name
    pub strategy: String,
    /// Trading pair
    pub symbol: String,
    /// Order side
    pub side: String,
    /// Total quantity
    pub qty: f64,
    /// Planned duration in seconds
    pub duration_secs: f64,
    /// Market category
    pub category: String,
    /// Lifecycle action
    pub action: String,
    /// Reduce-only flag
    pub reduce_only: bool,
    /// Master order status
    pub status: String,
    /// Date as sent by the server
    pub date: f64,
    /// Tick time (integer seconds)
    pub ticktime_int: i64,
    /// Tick time (milliseconds)
    pub ticktime_ms: TimestampMs,
    /// Status reason
    pub reason: String,
    /// Event time
    pub timestamp: TimestampMs,
}

/// Child order update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderEvent {
    /// Parent master order ID
    pub master_order_id: String,
    /// Child order ID
    pub order_id: String,
    /// Trading pair
    pub symbol: String,
    /// Market category
    pub category: String,
    /// Order side
    pub side: String,
    /// Limit price
    pub price: f64,
    /// Order quantity
    pub quantity: f64,
    /// Order status
    pub status: String,
    /// Creation time
    pub created_time: TimestampMs,
    /// Last fill quantity
    pub fill_qty: f64,
    /// Last fill price
    pub fill_price: f64,
    /// Cumulative filled quantity
    pub cum_filled_qty: f64,
    /// Quantity still open
    pub quantity_remaining: f64,
    /// Exchange acknowledgement time
    pub ack_time: TimestampMs,
    /// Last fill time
    pub last_fill_time: TimestampMs,
    /// Cancel time
    pub cancel_time: TimestampMs,
    /// Price type (limit, market, ...)
    pub price_type: String,
    /// Status reason
    pub reason: String,
    /// Event time
    pub timestamp: TimestampMs,
}

/// Fill notification
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FillEvent {
    /// Parent master order ID
    pub master_order_id: String,
    /// Child order ID
    pub order_id: String,
    /// Trading pair
    pub symbol: String,
    /// Market category
    pub category: String,
    /// Fill side
    pub side: String,
    /// Fill price
    pub fill_price: f64,
    /// Filled quantity
    pub filled_qty: f64,
    /// Fill time
    pub fill_time: TimestampMs,
    /// Event time
    pub timestamp: TimestampMs,
}
