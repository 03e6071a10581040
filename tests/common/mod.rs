//! Shared test utilities: a scripted in-memory exchange

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, to_value, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use upbit_autotrader::config::Granularity;
use upbit_autotrader::upbit::types::{Account, MarketInfo, OrderResponse, Ticker, UpbitCandle};
use upbit_autotrader::upbit::Credentials;
use upbit_autotrader::{Exchange, ExchangeRequest, Market, Order, TradingError, TradingResult};

/// Build exchange candles from closes given oldest first; returned newest first
pub fn upbit_candles(market: &str, closes: &[f64]) -> Vec<UpbitCandle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut candles: Vec<UpbitCandle> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let at = start + ChronoDuration::minutes(i as i64);
            UpbitCandle {
                market: market.to_string(),
                candle_date_time_utc: at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                opening_price: close,
                high_price: close,
                low_price: close,
                trade_price: close,
                timestamp: at.timestamp_millis(),
                candle_acc_trade_price: close,
                candle_acc_trade_volume: 1.0,
                unit: Some(1),
            }
        })
        .collect();
    candles.reverse();
    candles
}

/// Closes falling by `step` per candle, oldest first
pub fn falling_closes(count: usize, start: f64, step: f64) -> Vec<f64> {
    (0..count).map(|i| start - i as f64 * step).collect()
}

/// Closes alternating between `base` and `base + 1`; the default strategy holds on these
pub fn quiet_closes(count: usize, base: f64) -> Vec<f64> {
    (0..count)
        .map(|i| if i % 2 == 0 { base } else { base + 1.0 })
        .collect()
}

pub fn krw_account(balance: f64) -> Account {
    Account {
        currency: "KRW".to_string(),
        balance,
        locked: 0.0,
        avg_buy_price: 0.0,
        unit_currency: Some("KRW".to_string()),
    }
}

/// In-memory exchange with scripted candles, injected failures and latency
pub struct MockExchange {
    closes: Mutex<Vec<f64>>,
    candle_errors: Mutex<VecDeque<TradingError>>,
    order_errors: Mutex<VecDeque<TradingError>>,
    candle_delay: Mutex<Duration>,
    accounts: Mutex<Vec<Account>>,
    orders: Mutex<Vec<Order>>,
    executed_volume: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    candle_calls: AtomicUsize,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self {
            closes: Mutex::new(quiet_closes(100, 100.0)),
            candle_errors: Mutex::new(VecDeque::new()),
            order_errors: Mutex::new(VecDeque::new()),
            candle_delay: Mutex::new(Duration::ZERO),
            accounts: Mutex::new(vec![krw_account(1_000_000.0)]),
            orders: Mutex::new(Vec::new()),
            executed_volume: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            candle_calls: AtomicUsize::new(0),
        }
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_closes(&self, closes: Vec<f64>) {
        *self.closes.lock() = closes;
    }

    /// Append a newer candle
    pub fn push_close(&self, close: f64) {
        self.closes.lock().push(close);
    }

    pub fn fail_candles_with(&self, err: TradingError) {
        self.candle_errors.lock().push_back(err);
    }

    pub fn fail_orders_with(&self, err: TradingError) {
        self.order_errors.lock().push_back(err);
    }

    pub fn set_candle_delay(&self, delay: Duration) {
        *self.candle_delay.lock() = delay;
    }

    pub fn set_accounts(&self, accounts: Vec<Account>) {
        *self.accounts.lock() = accounts;
    }

    pub fn set_executed_volume(&self, volume: &str) {
        *self.executed_volume.lock() = Some(volume.to_string());
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }

    pub fn candle_calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn accounts(&self, _credentials: &Credentials) -> TradingResult<Vec<Account>> {
        Ok(self.accounts.lock().clone())
    }

    async fn ticker(&self, market: &Market) -> TradingResult<Ticker> {
        let price = self.closes.lock().last().copied().unwrap_or(0.0);
        Ok(Ticker {
            market: market.to_string(),
            trade_price: price,
            opening_price: price,
            high_price: price,
            low_price: price,
            prev_closing_price: price,
            change: Some("EVEN".to_string()),
            signed_change_rate: Some(0.0),
            acc_trade_volume_24h: None,
            timestamp: 0,
        })
    }

    async fn candles(
        &self,
        market: &Market,
        _granularity: Granularity,
        count: u32,
    ) -> TradingResult<Vec<UpbitCandle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.candle_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.candle_errors.lock().pop_front() {
            return Err(err);
        }

        let closes = self.closes.lock().clone();
        let mut candles = upbit_candles(market.as_str(), &closes);
        candles.truncate(count as usize);
        Ok(candles)
    }

    async fn markets(&self) -> TradingResult<Vec<MarketInfo>> {
        Ok(vec![
            MarketInfo {
                market: "KRW-BTC".to_string(),
                korean_name: "비트코인".to_string(),
                english_name: "Bitcoin".to_string(),
                market_warning: None,
            },
            MarketInfo {
                market: "KRW-ETH".to_string(),
                korean_name: "이더리움".to_string(),
                english_name: "Ethereum".to_string(),
                market_warning: None,
            },
        ])
    }

    async fn create_order(
        &self,
        order: &Order,
        _credentials: &Credentials,
    ) -> TradingResult<OrderResponse> {
        order.validate()?;
        self.orders.lock().push(order.clone());

        if let Some(err) = self.order_errors.lock().pop_front() {
            return Err(err);
        }

        let count = self.orders.lock().len();
        Ok(OrderResponse {
            uuid: format!("order-{count}"),
            side: order.side.as_wire().to_string(),
            ord_type: order.wire_ord_type().to_string(),
            price: order.price.map(|p| p.to_string()),
            state: Some("done".to_string()),
            market: order.market.to_string(),
            created_at: Some(Utc::now().to_rfc3339()),
            volume: order.volume.map(|v| v.to_string()),
            remaining_volume: Some("0".to_string()),
            executed_volume: self.executed_volume.lock().clone(),
            paid_fee: Some("0".to_string()),
            trades_count: Some(1),
        })
    }

    async fn forward(
        &self,
        request: &ExchangeRequest,
        credentials: &Credentials,
    ) -> TradingResult<Value> {
        let value = match request {
            ExchangeRequest::Accounts => to_value(self.accounts(credentials).await?),
            ExchangeRequest::Ticker(market) => to_value(vec![self.ticker(market).await?]),
            ExchangeRequest::Candles {
                market,
                granularity,
                count,
            } => to_value(self.candles(market, *granularity, *count).await?),
            ExchangeRequest::Markets => to_value(self.markets().await?),
            ExchangeRequest::OrderChance(market) => Ok(json!({
                "bid_fee": "0.0005",
                "ask_fee": "0.0005",
                "market": {"id": market.as_str(), "state": "active"}
            })),
            ExchangeRequest::CreateOrder(order) => {
                to_value(self.create_order(order, credentials).await?)
            }
        };
        value.map_err(|e| TradingError::Upstream {
            status: 200,
            message: e.to_string(),
        })
    }
}
