//! Error types for the qe-connector crate.
//!
//! The variants follow the failure classes a caller has to tell apart:
//!
//! - transport failures ([`Error::Http`], [`Error::WebSocket`], [`Error::Timeout`])
//! - well-formed error envelopes from the server ([`Error::Api`])
//! - successful HTTP exchanges whose envelope reports a failure ([`Error::Logical`])
//! - malformed JSON at either push envelope layer ([`Error::Decode`])
//!
//! Unrecognized push message kinds are not errors and never show up here.

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::client::websocket::SessionState;

/// The main error type for this crate
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request failed before a response was received
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Response payload could not be decoded into the requested shape
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with HTTP status >= 400
    #[error("{0}")]
    Api(ApiError),

    /// HTTP exchange succeeded but the envelope code was not 200
    #[error("request failed (code {code}): {reason}")]
    Logical {
        /// Envelope code
        code: i64,
        /// Envelope reason
        reason: String,
    },

    /// A push message envelope could not be decoded
    ///
    /// Returned when [`decoder::decode`](crate::client::decoder::decode) is
    /// called directly and propagated with `?`. The stream session reports
    /// the same failure as `Event::DecodeFailed` instead.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid configuration (missing fields, bad format)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The stream session refused a state transition
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidState {
        /// State the session was in
        from: SessionState,
        /// State that was requested
        to: SessionState,
    },

    /// The stream session has been closed
    #[error("session closed")]
    Closed,

    /// No traffic arrived within the liveness deadline
    #[error("liveness deadline expired")]
    Timeout,
}

impl Error {
    /// Whether this error is a server error envelope (HTTP status >= 400)
    pub fn is_api_error(&self) -> bool {
        matches!(self, Error::Api(_))
    }

    /// Borrow the server error envelope, if this is one
    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Api(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is a connection-level failure
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::WebSocket(_) | Error::Timeout)
    }
}

/// Error envelope returned by the API when the HTTP status is 4xx or 5xx
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// HTTP status code of the response
    #[serde(skip)]
    pub status: u16,
    /// Error code from the envelope
    #[serde(default)]
    pub code: i64,
    /// Short reason string
    #[serde(default)]
    pub reason: String,
    /// Free-form message payload
    #[serde(default)]
    pub message: serde_json::Value,
    /// Server trace identifier
    #[serde(default)]
    pub trace_id: String,
    /// Server time in milliseconds
    #[serde(default)]
    pub server_time: i64,
}

impl ApiError {
    /// Create an API error carrying only a status and reason
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            ..Self::default()
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "API error (status {}, code {}): {}, message={}, trace={}",
            self.status, self.code, self.reason, self.message, self.trace_id
        )
    }
}

impl std::error::Error for ApiError {}

/// Which envelope layer of a push message failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeLayer {
    /// The outer `{type, messageId, userId, data}` document
    Outer,
    /// The JSON document carried as a string in `data`
    Inner,
}

impl fmt::Display for EnvelopeLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeLayer::Outer => f.write_str("outer-envelope"),
            EnvelopeLayer::Inner => f.write_str("inner-envelope"),
        }
    }
}

/// A push message that could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{layer} decode failed: {detail}")]
pub struct DecodeError {
    /// Layer that failed
    pub layer: EnvelopeLayer,
    /// Parser message
    pub detail: String,
}

impl DecodeError {
    pub(crate) fn outer(err: serde_json::Error) -> Self {
        Self {
            layer: EnvelopeLayer::Outer,
            detail: err.to_string(),
        }
    }

    pub(crate) fn inner(err: serde_json::Error) -> Self {
        Self {
            layer: EnvelopeLayer::Inner,
            detail: err.to_string(),
        }
    }
}
