//! HTTP REST client for the Quantum Execute API.
//!
//! [`RestClient`] turns an endpoint descriptor plus parameters into one HTTP
//! exchange: it injects `recvWindow`/`timestamp`, signs, attaches the API key,
//! sends, and unwraps the response envelope.
//!
//! Every response body is an envelope:
//!
//! ```json
//! {"code": 200, "reason": "ok", "message": {...}, "traceId": "...", "serverTime": 1700000000000}
//! ```
//!
//! HTTP status >= 400 yields [`Error::Api`]; a success status with an
//! envelope code other than 200 yields [`Error::Logical`]; otherwise the
//! `message` payload is handed back re-serialized.
//!
//! # Example
//!
//! ```rust,no_run
//! use qe_connector::{Config, QeClient};
//!
//! # async fn example() -> qe_connector::Result<()> {
//! let client = QeClient::new(Config::new("api-key", "secret-key"))?;
//! client.rest().sync_time().await?;
//! let listen_key = client.rest().create_listen_key().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::client::auth::{
    canonical_string, Signer, API_KEY_HEADER, RECV_WINDOW_KEY, SIGNATURE_KEY, TIMESTAMP_KEY,
};
use crate::client::request::{Endpoint, Request, SecurityLevel};
use crate::config::Config;
use crate::error::{ApiError, Error};
use crate::types::{ListenKey, ServerTime};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP client for the REST API
#[derive(Debug)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    signer: Signer,
    recv_window: Option<u64>,
    time_offset_ms: AtomicI64,
}

/// A fully resolved request, ready to send
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method
    pub method: Method,
    /// Base URL, path and final query string (signature last)
    pub url: String,
    /// Headers to send
    pub headers: HeaderMap,
    /// Form-encoded body, if any form parameters were set
    pub body: Option<String>,
}

/// Success envelope wrapping every response with HTTP status < 400
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSuccess {
    code: i64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: serde_json::Value,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.rest_base_url().trim_end_matches('/').to_string(),
            api_key: config.api_key().to_string(),
            signer: Signer::new(config.secret_key()),
            recv_window: config.recv_window(),
            time_offset_ms: AtomicI64::new(config.time_offset_ms()),
        })
    }

    /// Current clock-skew offset (local minus server, milliseconds)
    pub fn time_offset_ms(&self) -> i64 {
        self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Replace the clock-skew offset used for signed timestamps
    pub fn set_time_offset_ms(&self, offset: i64) {
        self.time_offset_ms.store(offset, Ordering::Relaxed);
    }

    /// Resolve URL, headers and body for `request` as of `now_ms`
    ///
    /// Pure: no I/O happens here. Signed requests get `timestamp =
    /// now_ms - offset`, and the signature covers exactly the query string
    /// and body that end up on the wire.
    pub fn prepare(&self, request: &Request, now_ms: i64) -> Result<PreparedRequest, Error> {
        let security = request.endpoint.security;

        let mut query = request.query.clone();
        // A zero window means "not set"
        let recv_window = request.recv_window.or(self.recv_window).filter(|w| *w > 0);
        if let Some(recv_window) = recv_window {
            query.set(RECV_WINDOW_KEY, recv_window);
        }
        if security == SecurityLevel::Signed {
            query.set(TIMESTAMP_KEY, now_ms - self.time_offset_ms());
        }

        let mut query_string = query.encode();
        let body = request.form.encode();

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent()));
        if !body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }
        if security.sends_api_key() {
            let value = HeaderValue::from_str(&self.api_key)
                .map_err(|_| Error::Config("API key is not a valid header value".to_string()))?;
            headers.insert(API_KEY_HEADER, value);
        }

        if security == SecurityLevel::Signed {
            let signature = self.signer.sign(&canonical_string(&query_string, &body));
            let encoded = form_urlencoded::Serializer::new(String::new())
                .append_pair(SIGNATURE_KEY, &signature)
                .finish();
            if !query_string.is_empty() {
                query_string.push('&');
            }
            query_string.push_str(&encoded);
        }

        let mut url = format!("{}{}", self.base_url, request.endpoint.path);
        if !query_string.is_empty() {
            url.push('?');
            url.push_str(&query_string);
        }

        Ok(PreparedRequest {
            method: request.endpoint.method.clone(),
            url,
            headers,
            body: (!body.is_empty()).then_some(body),
        })
    }

    /// Send `request` and return the envelope's `message` payload as JSON bytes
    pub async fn execute(&self, request: Request) -> Result<Vec<u8>, Error> {
        let prepared = self.prepare(&request, Signer::current_timestamp_ms())?;
        debug!(
            method = %prepared.method,
            url = %prepared.url,
            body = prepared.body.as_deref().unwrap_or(""),
            "sending request"
        );

        let mut builder = self
            .client
            .request(prepared.method, &prepared.url)
            .headers(prepared.headers);
        if let Some(body) = prepared.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(
            status,
            body = %String::from_utf8_lossy(&body),
            "received response"
        );

        classify_response(status, &body)
    }

    /// Send `request` and decode the payload into `T`
    pub async fn call<T>(&self, request: Request) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let payload = self.execute(request).await?;
        serde_json::from_slice(&payload).map_err(Error::from)
    }

    /// Check connectivity
    pub async fn ping(&self) -> Result<(), Error> {
        self.execute(Request::new(Endpoint::get("/ping", SecurityLevel::None)))
            .await
            .map(|_| ())
    }

    /// Server time in milliseconds since the Unix epoch
    pub async fn server_time(&self) -> Result<i64, Error> {
        let time: ServerTime = self
            .call(Request::new(Endpoint::get("/timestamp", SecurityLevel::None)))
            .await?;
        Ok(time.server_time_milli)
    }

    /// Measure the local clock against the server's and store the offset
    ///
    /// Returns the new offset (local minus server, milliseconds).
    pub async fn sync_time(&self) -> Result<i64, Error> {
        let server = self.server_time().await?;
        let offset = Signer::current_timestamp_ms() - server;
        self.set_time_offset_ms(offset);
        debug!(offset_ms = offset, "clock offset updated");
        Ok(offset)
    }

    /// Create a listen key for the user event stream
    pub async fn create_listen_key(&self) -> Result<ListenKey, Error> {
        self.call(Request::new(Endpoint::post(
            "/user/trading/listen-key",
            SecurityLevel::Signed,
        )))
        .await
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Classify a raw HTTP response by status and envelope code
///
/// Returns the envelope's `message` payload re-serialized as JSON.
pub fn classify_response(status: u16, body: &[u8]) -> Result<Vec<u8>, Error> {
    if status >= 400 {
        let mut api_error = match serde_json::from_slice::<ApiError>(body) {
            Ok(api_error) => api_error,
            Err(e) => {
                debug!(error = %e, "error body is not an API envelope");
                ApiError::new(status, String::from_utf8_lossy(body))
            }
        };
        api_error.status = status;
        return Err(Error::Api(api_error));
    }

    let envelope: ApiSuccess = serde_json::from_slice(body)?;
    if envelope.code != 200 {
        debug!(code = envelope.code, reason = %envelope.reason, "envelope reported failure");
        return Err(Error::Logical {
            code: envelope.code,
            reason: envelope.reason,
        });
    }

    serde_json::to_vec(&envelope.message).map_err(Error::from)
}

fn user_agent() -> &'static str {
    concat!("qe-connector-rust/", env!("CARGO_PKG_VERSION"))
}
