//! Request signing for the Upbit exchange
//!
//! Every signed request carries three headers:
//! - `Access-Key`: the caller's access key
//! - `Nonce`: a fresh UUID per request
//! - `Signature`: base64(HMAC-SHA512(canonical query string, secret key))
//!
//! The canonical query string joins `key=value` pairs with `&` in the order
//! the caller supplied them, without extra encoding. Requests without
//! parameters sign the empty string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

pub const ACCESS_KEY_HEADER: &str = "Access-Key";
pub const NONCE_HEADER: &str = "Nonce";
pub const SIGNATURE_HEADER: &str = "Signature";

/// Ordered request parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Params(Vec::new())
    }

    /// Append a parameter, keeping insertion order
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.push((key.into(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `k1=v1&k2=v2` in insertion order; this exact string is what gets signed
    pub fn canonical_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// JSON object carrying the same fields, for request bodies
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Compute base64(HMAC-SHA512(payload, secret))
pub fn sign_payload(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Per-request replay token
pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Headers attached to one signed request
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub access_key: String,
    pub nonce: String,
    pub signature: String,
}

/// API credentials. The secret is only ever used as HMAC key material.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Empty credentials for public endpoints; no signature headers are sent
    pub fn anonymous() -> Self {
        Self::new("", "")
    }

    pub fn is_anonymous(&self) -> bool {
        self.access_key.is_empty() || self.secret_key.is_empty()
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Stable user identity derived from the access key prefix
    pub fn user_id(&self) -> String {
        self.access_key.chars().take(8).collect()
    }

    /// Digest of the full access key; identifies the owner of a session
    /// without keeping the key itself
    pub fn fingerprint(&self) -> String {
        STANDARD.encode(Sha512::digest(self.access_key.as_bytes()))
    }

    pub fn sign(&self, payload: &str) -> String {
        sign_payload(payload, &self.secret_key)
    }

    /// Build the header set for a request with the given parameters
    pub fn auth_headers(&self, params: &Params) -> AuthHeaders {
        AuthHeaders {
            access_key: self.access_key.clone(),
            nonce: new_nonce(),
            signature: self.sign(&params.canonical_query()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}
