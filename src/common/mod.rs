//! Common utilities shared by the exchange client
//!
//! - Rate limiter with one bucket per exchange request group

pub mod rate_limiter;

pub use rate_limiter::{GroupedRateLimiter, RateLimiter, RateLimiterConfig, RequestGroup};
