//! Rate limiter implementation using a refilling token bucket
//!
//! The exchange enforces separate per-second budgets for public market data,
//! signed account queries and order placement. Every request acquires a token
//! from its group's bucket before it is sent.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests allowed per refill interval
    pub max_requests_per_second: usize,
    /// Refill interval for tokens
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new configuration with custom rate limit
    pub fn with_rate(mut self, requests_per_second: usize) -> Self {
        self.max_requests_per_second = requests_per_second;
        self
    }

    /// Create a new configuration with custom refill interval
    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: usize,
    window_start: Instant,
}

/// Token bucket refilled to capacity at the start of every window
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: usize,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = config.max_requests_per_second.max(1);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                window_start: Instant::now(),
            }),
            capacity,
            refill_interval: config.refill_interval,
        }
    }

    /// Wait until a token is available and consume it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                (bucket.window_start + self.refill_interval).saturating_duration_since(Instant::now())
            };
            tracing::debug!("Rate limit reached, waiting {}ms", wait.as_millis());
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        if now.duration_since(bucket.window_start) >= self.refill_interval {
            bucket.tokens = self.capacity;
            bucket.window_start = now;
        }
    }
}

/// Exchange request groups with independent budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestGroup {
    /// Public market data (ticker, candles, market list)
    Quotation,
    /// Signed, read-only account endpoints
    Exchange,
    /// Order placement
    Order,
}

/// One limiter per request group
#[derive(Debug)]
pub struct GroupedRateLimiter {
    quotation: RateLimiter,
    exchange: RateLimiter,
    order: RateLimiter,
}

impl GroupedRateLimiter {
    pub fn new(
        quotation: RateLimiterConfig,
        exchange: RateLimiterConfig,
        order: RateLimiterConfig,
    ) -> Self {
        Self {
            quotation: RateLimiter::new(quotation),
            exchange: RateLimiter::new(exchange),
            order: RateLimiter::new(order),
        }
    }

    pub fn limiter(&self, group: RequestGroup) -> &RateLimiter {
        match group {
            RequestGroup::Quotation => &self.quotation,
            RequestGroup::Exchange => &self.exchange,
            RequestGroup::Order => &self.order,
        }
    }

    pub async fn acquire(&self, group: RequestGroup) {
        self.limiter(group).acquire().await;
    }
}

impl Default for GroupedRateLimiter {
    fn default() -> Self {
        Self::new(
            RateLimiterConfig::default().with_rate(10),
            RateLimiterConfig::default().with_rate(30),
            RateLimiterConfig::default().with_rate(8),
        )
    }
}
