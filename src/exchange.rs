//! Exchange abstraction
//!
//! The trait every venue implementation provides to the market data feed,
//! the session controller and the pass-through endpoints. `UpbitClient` is
//! the production implementation.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Granularity;
use crate::error::TradingResult;
use crate::types::{Market, Order};
use crate::upbit::types::{Account, MarketInfo, OrderResponse, Ticker, UpbitCandle};
use crate::upbit::Credentials;

/// A request relayed to the exchange by the pass-through endpoints.
///
/// The reply is handed back as the exchange sent it, so callers see every
/// field in its original representation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeRequest {
    Accounts,
    Ticker(Market),
    Candles {
        market: Market,
        granularity: Granularity,
        count: u32,
    },
    Markets,
    OrderChance(Market),
    CreateOrder(Order),
}

impl ExchangeRequest {
    /// Whether the exchange requires signed credentials for this request
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::Accounts | Self::OrderChance(_) | Self::CreateOrder(_)
        )
    }
}

#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    /// Balances of the credential owner
    async fn accounts(&self, credentials: &Credentials) -> TradingResult<Vec<Account>>;

    /// Latest ticker for one market
    async fn ticker(&self, market: &Market) -> TradingResult<Ticker>;

    /// Up to `count` candles, newest first as the exchange returns them
    async fn candles(
        &self,
        market: &Market,
        granularity: Granularity,
        count: u32,
    ) -> TradingResult<Vec<UpbitCandle>>;

    /// All tradable markets (unauthenticated)
    async fn markets(&self) -> TradingResult<Vec<MarketInfo>>;

    /// Submit an order. Implementations validate the order before sending
    /// and never retry the submission themselves.
    async fn create_order(
        &self,
        order: &Order,
        credentials: &Credentials,
    ) -> TradingResult<OrderResponse>;

    /// Relay one request and return the exchange's JSON reply untouched.
    /// Orders are validated before sending, as with `create_order`.
    async fn forward(
        &self,
        request: &ExchangeRequest,
        credentials: &Credentials,
    ) -> TradingResult<Value>;
}
