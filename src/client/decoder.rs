//! Two-pass decoder for user event stream frames.
//!
//! Decoding is pure: no state is kept between frames.

use crate::error::DecodeError;
use crate::types::messages::{
    FillEvent, InnerKind, MasterOrderEvent, OrderEvent, PushEnvelope, PushKind, ThirdPartyEnvelope,
};

/// A classified push message
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// `status` message; `data` verbatim
    Status(String),
    /// `error` message; `data` is the human-readable text
    ServerError(String),
    /// Master order update
    MasterOrder(MasterOrderEvent),
    /// Child order update
    Order(OrderEvent),
    /// Fill notification
    Fill(FillEvent),
    /// Outer or inner kind this client does not know; dropped by the session
    Unrecognized {
        /// Outer tag
        kind: String,
        /// Inner tag, when the outer kind carries one
        inner_kind: Option<String>,
    },
}

/// Decode one text frame through both envelope layers
///
/// The error converts into [`Error::Decode`](crate::Error::Decode) with `?`.
pub fn decode(frame: &str) -> Result<PushEvent, DecodeError> {
    let envelope = parse_envelope(frame)?;
    classify(&envelope)
}

/// First pass: parse the outer envelope
pub fn parse_envelope(frame: &str) -> Result<PushEnvelope, DecodeError> {
    serde_json::from_str(frame).map_err(DecodeError::outer)
}

/// Second pass: classify an outer envelope, decoding `data` when it nests
pub fn classify(envelope: &PushEnvelope) -> Result<PushEvent, DecodeError> {
    match envelope.push_kind() {
        PushKind::Status => Ok(PushEvent::Status(envelope.data.clone())),
        PushKind::Error => Ok(PushEvent::ServerError(envelope.data.clone())),
        kind if kind.has_inner_envelope() => classify_inner(envelope),
        _ => Ok(PushEvent::Unrecognized {
            kind: envelope.kind.clone(),
            inner_kind: None,
        }),
    }
}

fn classify_inner(envelope: &PushEnvelope) -> Result<PushEvent, DecodeError> {
    let data = envelope.data.as_str();
    let inner: ThirdPartyEnvelope = serde_json::from_str(data).map_err(DecodeError::inner)?;

    let event = match inner.inner_kind() {
        InnerKind::MasterOrder => {
            PushEvent::MasterOrder(serde_json::from_str(data).map_err(DecodeError::inner)?)
        }
        InnerKind::Order => PushEvent::Order(serde_json::from_str(data).map_err(DecodeError::inner)?),
        InnerKind::Fill => PushEvent::Fill(serde_json::from_str(data).map_err(DecodeError::inner)?),
        InnerKind::Unknown => PushEvent::Unrecognized {
            kind: envelope.kind.clone(),
            inner_kind: Some(inner.kind),
        },
    };
    Ok(event)
}
