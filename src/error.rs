//! Error taxonomy shared by the exchange client, the session controller
//! and the control surface.
//!
//! Client-layer errors bubble up unmodified; the session controller decides
//! between retrying, skipping and failing the session based on the kind.

use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type TradingResult<T> = Result<T, TradingError>;

#[derive(Debug, Clone, Error)]
pub enum TradingError {
    /// Bad or expired credentials (401/403). Fatal to a session.
    #[error("authentication rejected by exchange ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Exchange throttled the request (429)
    #[error("rate limited by exchange{}", format_retry_after(.retry_after))]
    RateLimit { retry_after: Option<Duration> },

    /// Any other non-2xx answer, or a body we could not decode
    #[error("exchange returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Transport failure before a response was received
    #[error("network error: {0}")]
    Network(String),

    #[error("a trading session already exists for {user_id} on {market}")]
    Conflict { user_id: String, market: String },

    #[error("no trading session for {user_id} on {market}")]
    NotFound { user_id: String, market: String },

    /// Malformed input: bad config, order missing volume/price, unknown market
    #[error("validation failed: {0}")]
    Validation(String),
}

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}ms)", d.as_millis()),
        None => String::new(),
    }
}

/// Stable label of an error kind, reported on the wire and on snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    AuthError,
    RateLimitError,
    UpstreamError,
    NetworkError,
    ConflictError,
    NotFoundError,
    ValidationError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::RateLimitError => "RateLimitError",
            ErrorKind::UpstreamError => "UpstreamError",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::ConflictError => "ConflictError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::ValidationError => "ValidationError",
        };
        f.write_str(label)
    }
}

impl TradingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TradingError::Auth { .. } => ErrorKind::AuthError,
            TradingError::RateLimit { .. } => ErrorKind::RateLimitError,
            TradingError::Upstream { .. } => ErrorKind::UpstreamError,
            TradingError::Network(_) => ErrorKind::NetworkError,
            TradingError::Conflict { .. } => ErrorKind::ConflictError,
            TradingError::NotFound { .. } => ErrorKind::NotFoundError,
            TradingError::Validation(_) => ErrorKind::ValidationError,
        }
    }

    /// Shorthand for `TradingError::Validation`
    pub fn validation(message: impl Into<String>) -> Self {
        TradingError::Validation(message.into())
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        // without_url keeps query strings (market, count) out of logs
        TradingError::Network(err.without_url().to_string())
    }
}
