//! # qe-connector
//!
//! Rust client for the [Quantum Execute](https://quantumexecute.com) trading API.
//!
//! ## Features
//!
//! - **REST API Client** - Signed HTTP calls with clock-skew correction
//! - **User Event Stream** - Master order, child order and fill updates over
//!   WebSocket, with heartbeat and automatic reconnect
//! - **Async/Await** - Built on Tokio
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qe_connector::client::websocket::Event;
//! use qe_connector::{Config, QeClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), qe_connector::Error> {
//!     let client = QeClient::new(Config::from_env()?)?;
//!
//!     // Correct for local clock drift before signing anything
//!     client.rest().sync_time().await?;
//!
//!     let listen_key = client.rest().create_listen_key().await?;
//!     let session = client.websocket(|event: Event| {
//!         if let Event::Fill(fill) = event {
//!             println!("{} filled {} @ {}", fill.symbol, fill.filled_qty, fill.fill_price);
//!         }
//!     });
//!     session.connect(listen_key.listen_key).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Signing
//!
//! Signed requests carry `timestamp` (local time minus the measured clock
//! offset) and optionally `recvWindow` in the query string. The HMAC-SHA256
//! signature covers the encoded query string immediately followed by the
//! encoded form body, and is appended as the last query parameter.
//!
//! ## Architecture
//!
//! - [`client`] - REST client, signing, push decoder and stream session
//! - [`types`] - Wire types for REST payloads and push messages
//! - [`config`] - Credentials, environments and timeouts
//! - [`error`] - Error types for the crate

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod types;

// Re-export main types at crate root for convenience
pub use config::{Config, Environment};
pub use error::{ApiError, DecodeError, Error};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The main Quantum Execute API client
///
/// Owns the REST client and opens user event stream sessions against the
/// configured environment.
///
/// # Example
///
/// ```rust,no_run
/// use qe_connector::{Config, Environment, QeClient};
///
/// # async fn example() -> qe_connector::Result<()> {
/// let config = Config::new("api-key", "secret-key").with_environment(Environment::Test);
/// let client = QeClient::new(config)?;
///
/// let server_time = client.rest().server_time().await?;
/// println!("server time: {}", server_time);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct QeClient {
    config: Config,
    rest_client: client::rest::RestClient,
}

impl QeClient {
    /// Create a new client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: Config) -> Result<Self> {
        let rest_client = client::rest::RestClient::new(&config)?;
        Ok(Self {
            config,
            rest_client,
        })
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &client::rest::RestClient {
        &self.rest_client
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create a stream session with default timing
    ///
    /// The session is not connected yet; call
    /// [`connect`](client::websocket::WebSocketSession::connect) with a listen key.
    pub fn websocket(
        &self,
        handler: impl client::websocket::EventHandler,
    ) -> client::websocket::WebSocketSession {
        self.websocket_with(handler, client::websocket::SessionConfig::default())
    }

    /// Create a stream session with custom timing
    pub fn websocket_with(
        &self,
        handler: impl client::websocket::EventHandler,
        session_config: client::websocket::SessionConfig,
    ) -> client::websocket::WebSocketSession {
        client::websocket::WebSocketSession::with_config(
            self.config.websocket_base_url(),
            handler,
            session_config,
        )
    }
}
