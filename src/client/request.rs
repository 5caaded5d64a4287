//! Endpoint descriptors and parameter bags.
//!
//! Every REST call is described by an [`Endpoint`] (method, path, security
//! level) and a [`Request`] holding query and form parameters. The
//! [`RestClient`](crate::client::RestClient) turns the pair into an HTTP
//! exchange.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::Method;
use url::form_urlencoded;

/// How a request authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    /// Public endpoint
    #[default]
    None,
    /// API key header only
    ApiKey,
    /// API key header plus timestamp and HMAC signature
    Signed,
}

impl SecurityLevel {
    /// Whether the API key header is attached
    pub fn sends_api_key(self) -> bool {
        matches!(self, SecurityLevel::ApiKey | SecurityLevel::Signed)
    }
}

/// Method, path and security level of one API endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// HTTP method
    pub method: Method,
    /// Path appended to the base URL (e.g. `/ping`)
    pub path: String,
    /// Authentication requirement
    pub security: SecurityLevel,
}

impl Endpoint {
    /// Create an endpoint descriptor
    pub fn new(method: Method, path: impl Into<String>, security: SecurityLevel) -> Self {
        Self {
            method,
            path: path.into(),
            security,
        }
    }

    /// GET endpoint
    pub fn get(path: impl Into<String>, security: SecurityLevel) -> Self {
        Self::new(Method::GET, path, security)
    }

    /// POST endpoint
    pub fn post(path: impl Into<String>, security: SecurityLevel) -> Self {
        Self::new(Method::POST, path, security)
    }

    /// PUT endpoint
    pub fn put(path: impl Into<String>, security: SecurityLevel) -> Self {
        Self::new(Method::PUT, path, security)
    }

    /// DELETE endpoint
    pub fn delete(path: impl Into<String>, security: SecurityLevel) -> Self {
        Self::new(Method::DELETE, path, security)
    }
}

/// Multi-valued parameter map
///
/// Encoding is standard form encoding with keys in sorted order, so the
/// order in which parameters are set never changes the encoded string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, Vec<String>>,
}

impl Params {
    /// Create an empty parameter map
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to a single value, replacing any previous values
    pub fn set(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.values.insert(key.into(), vec![value.to_string()]);
        self
    }

    /// Append a value to `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl fmt::Display) -> &mut Self {
        self.values
            .entry(key.into())
            .or_default()
            .push(value.to_string());
        self
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Whether no parameters are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Form-encode the parameters (`a=1&b=x+y`)
    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.values {
            for value in values {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: fmt::Display> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.add(key, value);
        }
        params
    }
}

/// A request against one endpoint
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) endpoint: Endpoint,
    pub(crate) query: Params,
    pub(crate) form: Params,
    pub(crate) recv_window: Option<u64>,
}

impl Request {
    /// Start a request for `endpoint`
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            query: Params::new(),
            form: Params::new(),
            recv_window: None,
        }
    }

    /// Set a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.query.set(key, value);
        self
    }

    /// Set a form (body) parameter
    #[must_use]
    pub fn form(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.form.set(key, value);
        self
    }

    /// Set a query parameter only when a value is present
    #[must_use]
    pub fn query_opt<V: fmt::Display>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Override the configured `recvWindow` for this request
    #[must_use]
    pub fn recv_window(mut self, recv_window: u64) -> Self {
        self.recv_window = Some(recv_window);
        self
    }

    /// Endpoint this request targets
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Query parameters set so far
    pub fn query_params(&self) -> &Params {
        &self.query
    }

    /// Form parameters set so far
    pub fn form_params(&self) -> &Params {
        &self.form
    }
}
