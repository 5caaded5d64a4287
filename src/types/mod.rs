//! API types for Quantum Execute requests, responses and push messages.
//!
//! - [`messages`] - user event stream envelopes and typed events
//! - [`rest`] - payloads of the REST endpoints the client calls itself

pub mod messages;
pub mod rest;

pub use messages::{
    FillEvent, InnerKind, MasterOrderEvent, OrderEvent, PushEnvelope, PushKind,
    ThirdPartyEnvelope,
};
pub use rest::{ListenKey, ServerTime};

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = i64;
