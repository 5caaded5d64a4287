//! API clients for communicating with Quantum Execute.
//!
//! This module contains:
//!
//! - [`rest`] - HTTP client for REST API endpoints
//! - [`request`] - Endpoint descriptors and parameter maps
//! - [`auth`] - HMAC-SHA256 request signing
//! - [`decoder`] - Two-pass decoder for push messages
//! - [`websocket`] - Self-healing user event stream

pub mod auth;
pub mod decoder;
pub mod request;
pub mod rest;
pub mod websocket;

pub use auth::Signer;
pub use decoder::PushEvent;
pub use request::{Endpoint, Params, Request, SecurityLevel};
pub use rest::RestClient;
pub use websocket::{Event, EventHandler, SessionConfig, SessionState, WebSocketSession};
