//! Upbit API Client
//!
//! An HTTP client for the Upbit exchange with:
//! - Per-request HMAC-SHA512 signatures (`Access-Key`, `Nonce`, `Signature`)
//! - Rate limiting per request group
//! - Status-code based error classification
//!
//! The client never retries on its own. Blind retries on order placement risk
//! duplicate orders, so the caller decides.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use upbit_autotrader::upbit::{ClientConfig, Credentials, Params, UpbitClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default().with_timeout(Duration::from_secs(10));
//!     let client = UpbitClient::with_config(config)?;
//!
//!     let params = Params::new().with("market", "KRW-BTC");
//!     let credentials = Credentials::new("access_key", "secret_key");
//!     let chance = client
//!         .call(reqwest::Method::GET, "/orders/chance", &params, &credentials)
//!         .await?;
//!     println!("{chance}");
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::auth::{Credentials, Params, ACCESS_KEY_HEADER, NONCE_HEADER, SIGNATURE_HEADER};
use super::types::{Account, ErrorEnvelope, MarketInfo, OrderResponse, Ticker, UpbitCandle};
use crate::common::{GroupedRateLimiter, RateLimiterConfig, RequestGroup};
use crate::config::{ExchangeConfig, Granularity, MAX_CANDLE_COUNT};
use crate::error::{TradingError, TradingResult};
use crate::exchange::{Exchange, ExchangeRequest};
use crate::types::{Market, Order};

/// Base URL for the Upbit REST API
pub const API_BASE_URL: &str = "https://api.upbit.com/v1";

/// Longest server-requested backoff honoured from `Retry-After`
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Request timeout duration
    pub timeout: Duration,
    pub quotation_limit: RateLimiterConfig,
    pub exchange_limit: RateLimiterConfig,
    pub order_limit: RateLimiterConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            quotation_limit: RateLimiterConfig::default().with_rate(10),
            exchange_limit: RateLimiterConfig::default().with_rate(30),
            order_limit: RateLimiterConfig::default().with_rate(8),
        }
    }
}

impl ClientConfig {
    pub fn from_exchange_config(config: &ExchangeConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
            quotation_limit: config.rate_limiter(config.quotation_rate_limit),
            exchange_limit: config.rate_limiter(config.exchange_rate_limit),
            order_limit: config.rate_limiter(config.order_rate_limit),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set order placement rate limit (requests per second)
    pub fn with_order_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.order_limit = self.order_limit.with_rate(requests_per_second);
        self
    }
}

/// Upbit Exchange API Client
///
/// Cheap to clone; clones share the connection pool and rate limiters.
#[derive(Clone)]
pub struct UpbitClient {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<GroupedRateLimiter>,
}

impl UpbitClient {
    /// Create a client against the production API with default limits
    pub fn new() -> TradingResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> TradingResult<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(GroupedRateLimiter::new(
                config.quotation_limit,
                config.exchange_limit,
                config.order_limit,
            )),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform one request against `path`.
    ///
    /// GET parameters travel in the query string; other methods send them as a
    /// JSON body. Either way the signature covers the canonical query string
    /// of `params`. Anonymous credentials send no auth headers.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        params: &Params,
        credentials: &Credentials,
    ) -> TradingResult<Value> {
        let query = params.canonical_query();
        let url = if method == Method::GET && !query.is_empty() {
            format!("{}{}?{}", self.base_url, path, query)
        } else {
            format!("{}{}", self.base_url, path)
        };

        let mut request = self.http_client.request(method.clone(), &url);
        if method != Method::GET {
            request = request.json(&params.to_json());
        }
        if !credentials.is_anonymous() {
            let headers = credentials.auth_headers(params);
            request = request
                .header(ACCESS_KEY_HEADER, headers.access_key)
                .header(NONCE_HEADER, headers.nonce)
                .header(SIGNATURE_HEADER, headers.signature);
        }

        let group = request_group(&method, path);
        self.rate_limiter.acquire(group).await;

        debug!(%method, path, "Sending exchange request");
        let response = request.send().await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await?;

        if !status.is_success() {
            let err = classify_status(status, retry_after, &text);
            warn!(%method, path, status = status.as_u16(), "Exchange request failed: {}", err);
            return Err(err);
        }

        serde_json::from_str(&text).map_err(|e| TradingError::Upstream {
            status: status.as_u16(),
            message: format!("invalid JSON in response: {e}"),
        })
    }

    /// Map a relayed request onto its endpoint and send it. Public market
    /// data is always requested anonymously.
    pub async fn forward(
        &self,
        request: &ExchangeRequest,
        credentials: &Credentials,
    ) -> TradingResult<Value> {
        if request.is_signed() {
            require_credentials(credentials)?;
        }
        let (method, path, params) = match request {
            ExchangeRequest::Accounts => (Method::GET, "/accounts".to_string(), Params::new()),
            ExchangeRequest::Ticker(market) => (
                Method::GET,
                "/ticker".to_string(),
                Params::new().with("markets", market),
            ),
            ExchangeRequest::Candles {
                market,
                granularity,
                count,
            } => {
                if *count == 0 || *count > MAX_CANDLE_COUNT {
                    return Err(TradingError::validation(format!(
                        "candle count must be in 1..={MAX_CANDLE_COUNT}, got {count}"
                    )));
                }
                (
                    Method::GET,
                    format!("/candles/{}", granularity.path()),
                    Params::new().with("market", market).with("count", count),
                )
            }
            ExchangeRequest::Markets => (Method::GET, "/market/all".to_string(), Params::new()),
            ExchangeRequest::OrderChance(market) => (
                Method::GET,
                "/orders/chance".to_string(),
                Params::new().with("market", market),
            ),
            ExchangeRequest::CreateOrder(order) => {
                order.validate()?;
                (Method::POST, "/orders".to_string(), order_params(order))
            }
        };

        if request.is_signed() {
            self.call(method, &path, &params, credentials).await
        } else {
            self.call(method, &path, &params, &Credentials::anonymous())
                .await
        }
    }

    // ==================== PUBLIC ENDPOINTS ====================

    /// Get the current ticker for a market
    pub async fn ticker(&self, market: &Market) -> TradingResult<Ticker> {
        let request = ExchangeRequest::Ticker(market.clone());
        let tickers: Vec<Ticker> =
            decode(self.forward(&request, &Credentials::anonymous()).await?)?;

        tickers
            .into_iter()
            .find(|t| t.market == market.as_str())
            .ok_or_else(|| TradingError::Upstream {
                status: 200,
                message: format!("ticker for {market} missing from response"),
            })
    }

    /// Get candles for a market, newest first
    pub async fn candles(
        &self,
        market: &Market,
        granularity: Granularity,
        count: u32,
    ) -> TradingResult<Vec<UpbitCandle>> {
        let request = ExchangeRequest::Candles {
            market: market.clone(),
            granularity,
            count,
        };
        decode(self.forward(&request, &Credentials::anonymous()).await?)
    }

    /// Get list of all available markets
    pub async fn markets(&self) -> TradingResult<Vec<MarketInfo>> {
        decode(
            self.forward(&ExchangeRequest::Markets, &Credentials::anonymous())
                .await?,
        )
    }

    // ==================== AUTHENTICATED ENDPOINTS ====================

    /// Get balances of the credential owner
    pub async fn accounts(&self, credentials: &Credentials) -> TradingResult<Vec<Account>> {
        decode(self.forward(&ExchangeRequest::Accounts, credentials).await?)
    }

    /// Fees, limits and balances relevant to ordering on a market
    pub async fn order_chance(
        &self,
        market: &Market,
        credentials: &Credentials,
    ) -> TradingResult<Value> {
        self.forward(&ExchangeRequest::OrderChance(market.clone()), credentials)
            .await
    }

    /// Place a new order. Validated locally before anything is sent.
    pub async fn create_order(
        &self,
        order: &Order,
        credentials: &Credentials,
    ) -> TradingResult<OrderResponse> {
        let request = ExchangeRequest::CreateOrder(order.clone());
        decode(self.forward(&request, credentials).await?)
    }
}

#[async_trait]
impl Exchange for UpbitClient {
    async fn accounts(&self, credentials: &Credentials) -> TradingResult<Vec<Account>> {
        UpbitClient::accounts(self, credentials).await
    }

    async fn ticker(&self, market: &Market) -> TradingResult<Ticker> {
        UpbitClient::ticker(self, market).await
    }

    async fn candles(
        &self,
        market: &Market,
        granularity: Granularity,
        count: u32,
    ) -> TradingResult<Vec<UpbitCandle>> {
        UpbitClient::candles(self, market, granularity, count).await
    }

    async fn markets(&self) -> TradingResult<Vec<MarketInfo>> {
        UpbitClient::markets(self).await
    }

    async fn create_order(
        &self,
        order: &Order,
        credentials: &Credentials,
    ) -> TradingResult<OrderResponse> {
        UpbitClient::create_order(self, order, credentials).await
    }

    async fn forward(
        &self,
        request: &ExchangeRequest,
        credentials: &Credentials,
    ) -> TradingResult<Value> {
        UpbitClient::forward(self, request, credentials).await
    }
}

/// Order fields in the exchange's order: market, side, volume, price, ord_type
pub fn order_params(order: &Order) -> Params {
    let mut params = Params::new()
        .with("market", &order.market)
        .with("side", order.side.as_wire());
    if let Some(volume) = order.volume {
        params.push("volume", volume);
    }
    if let Some(price) = order.price {
        params.push("price", price);
    }
    params.with("ord_type", order.wire_ord_type())
}

fn require_credentials(credentials: &Credentials) -> TradingResult<()> {
    if credentials.is_anonymous() {
        return Err(TradingError::Auth {
            status: 401,
            message: "API keys are required for this endpoint".to_string(),
        });
    }
    Ok(())
}

fn request_group(method: &Method, path: &str) -> RequestGroup {
    if path.starts_with("/orders") && *method != Method::GET {
        RequestGroup::Order
    } else if path.starts_with("/ticker")
        || path.starts_with("/candles")
        || path.starts_with("/market")
    {
        RequestGroup::Quotation
    } else {
        RequestGroup::Exchange
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> TradingResult<T> {
    serde_json::from_value(value).map_err(|e| TradingError::Upstream {
        status: 200,
        message: format!("unexpected response shape: {e}"),
    })
}

/// `Retry-After` in seconds (integer or fractional), capped at
/// [`MAX_RETRY_AFTER`]
fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| !secs.is_nan() && *secs >= 0.0)?;
    Duration::try_from_secs_f64(secs.min(MAX_RETRY_AFTER.as_secs_f64())).ok()
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> TradingError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TradingError::Auth {
            status: status.as_u16(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => TradingError::RateLimit { retry_after },
        _ => TradingError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => match (envelope.error.name, envelope.error.message) {
            (Some(name), Some(message)) => format!("{name}: {message}"),
            (None, Some(message)) => message,
            (Some(name), None) => name,
            (None, None) => "unknown error".to_string(),
        },
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.chars().take(200).collect(),
    }
}
