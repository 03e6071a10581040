//! Core data types used across the trading engine

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{TradingError, TradingResult};

/// OHLCV candlestick data, oldest-first when used for indicator math
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Market identifier of the form `QUOTE-BASE` (e.g. `KRW-BTC`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Market(String);

impl Market {
    pub fn parse(s: &str) -> TradingResult<Self> {
        let s = s.trim();
        let (quote, base) = s
            .split_once('-')
            .ok_or_else(|| TradingError::validation(format!("market '{s}' is not QUOTE-BASE")))?;

        let valid_part =
            |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
        if !valid_part(quote) || !valid_part(base) {
            return Err(TradingError::validation(format!(
                "market '{s}' is not QUOTE-BASE"
            )));
        }

        Ok(Market(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Currency the market is priced in (e.g. `KRW`)
    pub fn quote(&self) -> &str {
        self.0.split_once('-').map(|(q, _)| q).unwrap_or(&self.0)
    }

    /// Currency being traded (e.g. `BTC`)
    pub fn base(&self) -> &str {
        self.0.split_once('-').map(|(_, b)| b).unwrap_or(&self.0)
    }

    /// Decimal places accepted for quote amounts; KRW trades in whole won
    pub fn quote_precision(&self) -> u32 {
        if self.quote() == "KRW" {
            0
        } else {
            8
        }
    }
}

impl TryFrom<String> for Market {
    type Error = TradingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Market::parse(&value)
    }
}

impl From<Market> for String {
    fn from(market: Market) -> Self {
        market.0
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Indicator or combined trade signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Exchange wire value (`bid` / `ask`)
    pub fn as_wire(&self) -> &'static str {
        match self {
            Side::Buy => "bid",
            Side::Sell => "ask",
        }
    }

    pub fn from_wire(s: &str) -> TradingResult<Self> {
        match s {
            "bid" => Ok(Side::Buy),
            "ask" => Ok(Side::Sell),
            other => Err(TradingError::validation(format!(
                "unknown order side '{other}' (expected bid or ask)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

/// Order as produced by the risk manager or received by the pass-through endpoint.
///
/// A market buy carries the quote amount to spend in `price`; a market sell
/// carries the base amount in `volume`; a limit order needs both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub volume: Option<Decimal>,
    pub price: Option<Decimal>,
}

impl Order {
    pub fn market_buy(market: Market, notional: Decimal) -> Self {
        Order {
            market,
            side: Side::Buy,
            order_type: OrderType::Market,
            volume: None,
            price: Some(notional),
        }
    }

    pub fn market_sell(market: Market, volume: Decimal) -> Self {
        Order {
            market,
            side: Side::Sell,
            order_type: OrderType::Market,
            volume: Some(volume),
            price: None,
        }
    }

    pub fn limit(market: Market, side: Side, volume: Decimal, price: Decimal) -> Self {
        Order {
            market,
            side,
            order_type: OrderType::Limit,
            volume: Some(volume),
            price: Some(price),
        }
    }

    /// Mirror of the exchange's own field requirements, checked before sending
    pub fn validate(&self) -> TradingResult<()> {
        let needs_volume = matches!(
            (self.order_type, self.side),
            (OrderType::Limit, _) | (OrderType::Market, Side::Sell)
        );
        let needs_price = matches!(
            (self.order_type, self.side),
            (OrderType::Limit, _) | (OrderType::Market, Side::Buy)
        );

        if needs_volume && self.volume.is_none() {
            return Err(TradingError::validation(format!(
                "{:?} {:?} order requires volume",
                self.order_type, self.side
            )));
        }
        if needs_price && self.price.is_none() {
            return Err(TradingError::validation(format!(
                "{:?} {:?} order requires price",
                self.order_type, self.side
            )));
        }
        for (name, value) in [("volume", self.volume), ("price", self.price)] {
            if let Some(v) = value {
                if v <= Decimal::ZERO {
                    return Err(TradingError::validation(format!(
                        "order {name} must be positive, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Exchange `ord_type`: `limit`, `price` (market buy) or `market` (market sell)
    pub fn wire_ord_type(&self) -> &'static str {
        match (self.order_type, self.side) {
            (OrderType::Limit, _) => "limit",
            (OrderType::Market, Side::Buy) => "price",
            (OrderType::Market, Side::Sell) => "market",
        }
    }

    /// Build an order from exchange wire fields
    pub fn from_wire(
        market: &str,
        side: &str,
        ord_type: &str,
        volume: Option<Decimal>,
        price: Option<Decimal>,
    ) -> TradingResult<Self> {
        let market = Market::parse(market)?;
        let side = Side::from_wire(side)?;
        let order_type = match (ord_type, side) {
            ("limit", _) => OrderType::Limit,
            ("price", Side::Buy) | ("market", Side::Sell) => OrderType::Market,
            (other, side) => {
                return Err(TradingError::validation(format!(
                    "ord_type '{other}' is not valid for side {}",
                    side.as_wire()
                )))
            }
        };
        let order = Order {
            market,
            side,
            order_type,
            volume,
            price,
        };
        order.validate()?;
        Ok(order)
    }
}

/// Open long position held by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub market: Market,
    pub entry_price: f64,
    pub volume: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl Position {
    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.volume
    }

    /// Unrealized return as a fraction of entry (`-0.06` = 6% loss)
    pub fn unrealized_return(&self, current_price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (current_price - self.entry_price) / self.entry_price
    }
}

/// Convert a float amount to a decimal, truncated to `dp` places
pub fn to_decimal(value: f64, dp: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::ToZero).normalize())
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
