//! Configuration and credentials for the Quantum Execute API client.
//!
//! This module provides the [`Config`] struct for managing API credentials
//! and client settings.

use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// API environment (production or test)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment (real money)
    #[default]
    Production,
    /// Test environment
    Test,
}

impl Environment {
    /// Get the base URL for REST API
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.quantumexecute.com",
            Environment::Test => "https://testapi.quantumexecute.com",
        }
    }

    /// Get the base URL of the user event stream
    pub fn websocket_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "wss://api.quantumexecute.com",
            Environment::Test => "wss://test.quantumexecute.com",
        }
    }
}

/// Configuration for the Quantum Execute API client
///
/// # Example
///
/// ```rust
/// use qe_connector::Config;
/// use qe_connector::config::Environment;
///
/// let config = Config::new("my-api-key", "my-secret-key")
///     .with_environment(Environment::Test)
///     .with_recv_window(Some(5000))
///     .with_timeout(std::time::Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct Config {
    api_key: String,
    secret_key: SecretString,
    environment: Environment,
    timeout: Duration,
    recv_window: Option<u64>,
    time_offset_ms: i64,
    rest_base_url: Option<String>,
    websocket_base_url: Option<String>,
}

impl Config {
    /// Create a new configuration with API credentials
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: SecretString::new(secret_key.into()),
            environment: Environment::default(),
            timeout: Duration::from_secs(10),
            recv_window: None,
            time_offset_ms: 0,
            rest_base_url: None,
            websocket_base_url: None,
        }
    }

    /// Build a configuration from `QE_API_KEY`, `QE_SECRET_KEY` and the
    /// optional `QE_ENV` (`test` or `production`) and `QE_RECV_WINDOW`.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("QE_API_KEY")
            .map_err(|_| Error::Config("QE_API_KEY is not set".to_string()))?;
        let secret_key = std::env::var("QE_SECRET_KEY")
            .map_err(|_| Error::Config("QE_SECRET_KEY is not set".to_string()))?;

        let environment = match std::env::var("QE_ENV")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "" | "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            other => return Err(Error::Config(format!("unknown QE_ENV: {}", other))),
        };

        let recv_window = match std::env::var("QE_RECV_WINDOW") {
            Ok(raw) => Some(
                raw.parse()
                    .map_err(|_| Error::Config(format!("invalid QE_RECV_WINDOW: {}", raw)))?,
            ),
            Err(_) => None,
        };

        Ok(Self::new(api_key, secret_key)
            .with_environment(environment)
            .with_recv_window(recv_window))
    }

    /// Set the API environment
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the `recvWindow` (milliseconds) sent with every request
    #[must_use]
    pub fn with_recv_window(mut self, recv_window: Option<u64>) -> Self {
        self.recv_window = recv_window;
        self
    }

    /// Set the initial clock-skew offset (local minus server, milliseconds)
    #[must_use]
    pub fn with_time_offset_ms(mut self, offset: i64) -> Self {
        self.time_offset_ms = offset;
        self
    }

    /// Override the REST base URL
    #[must_use]
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = Some(url.into());
        self
    }

    /// Override the stream base URL
    #[must_use]
    pub fn with_websocket_base_url(mut self, url: impl Into<String>) -> Self {
        self.websocket_base_url = Some(url.into());
        self
    }

    /// Get the API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the secret key
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the REST API base URL
    pub fn rest_base_url(&self) -> &str {
        self.rest_base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.rest_base_url())
    }

    /// Get the stream base URL
    pub fn websocket_base_url(&self) -> &str {
        self.websocket_base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.websocket_base_url())
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the configured `recvWindow`
    pub fn recv_window(&self) -> Option<u64> {
        self.recv_window
    }

    /// Get the initial clock-skew offset
    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key)
            .field("secret_key", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("timeout", &self.timeout)
            .field("recv_window", &self.recv_window)
            .field("time_offset_ms", &self.time_offset_ms)
            .field("rest_base_url", &self.rest_base_url())
            .field("websocket_base_url", &self.websocket_base_url())
            .finish()
    }
}
