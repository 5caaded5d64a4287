//! HMAC-SHA256 request signing.
//!
//! Signed endpoints carry three extra query parameters:
//!
//! - `timestamp`: Unix time in milliseconds, corrected by the clock-skew offset
//! - `recvWindow`: optional validity window in milliseconds
//! - `signature`: lowercase hex HMAC-SHA256 of the canonical string, always last
//!
//! The canonical string is the form-encoded query string immediately
//! followed by the form-encoded body, with no separator. The API key travels
//! in the `X-MBX-APIKEY` header.
//!
//! # Example
//!
//! ```rust
//! use qe_connector::client::auth::{canonical_string, Signer};
//!
//! let signer = Signer::new("my-secret");
//! let payload = canonical_string("symbol=BTCUSDT&timestamp=1700000000000", "");
//! let signature = signer.sign(&payload);
//! assert_eq!(signature.len(), 64);
//! ```

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the request time
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Query parameter carrying the validity window
pub const RECV_WINDOW_KEY: &str = "recvWindow";
/// Query parameter carrying the signature
pub const SIGNATURE_KEY: &str = "signature";
/// Header carrying the raw API key
pub const API_KEY_HEADER: &str = "x-mbx-apikey";

/// HMAC-SHA256 signer bound to one secret key
#[derive(Clone)]
pub struct Signer {
    secret_key: SecretString,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer for the given secret key
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: SecretString::new(secret_key.into()),
        }
    }

    /// Sign a canonical string and return the lowercase hex MAC
    pub fn sign(&self, canonical: &str) -> String {
        sign(self.secret_key.expose_secret(), canonical)
    }

    /// Get the current timestamp in milliseconds
    pub fn current_timestamp_ms() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Compute `hex(HMAC_SHA256(secret_key, canonical))`
pub fn sign(secret_key: &str, canonical: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build the bytes a signature covers: query string then body, no separator
pub fn canonical_string(query: &str, body: &str) -> String {
    let mut canonical = String::with_capacity(query.len() + body.len());
    canonical.push_str(query);
    canonical.push_str(body);
    canonical
}
