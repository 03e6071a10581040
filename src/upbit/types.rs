//! Types and models for the Upbit REST API
//!
//! Response models follow the exchange's field names. Numeric fields that the
//! exchange sends as strings are parsed into `f64` on the way in.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Candle;

/// Account balance for one currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Currency code (e.g., "KRW", "BTC")
    pub currency: String,
    /// Available balance
    #[serde(deserialize_with = "deserialize_f64_or_string")]
    pub balance: f64,
    /// Balance locked in open orders
    #[serde(default, deserialize_with = "deserialize_f64_or_string")]
    pub locked: f64,
    #[serde(default, deserialize_with = "deserialize_f64_or_string")]
    pub avg_buy_price: f64,
    #[serde(default)]
    pub unit_currency: Option<String>,
}

/// Current price snapshot for a market
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    /// Last traded price
    pub trade_price: f64,
    #[serde(default)]
    pub opening_price: f64,
    #[serde(default)]
    pub high_price: f64,
    #[serde(default)]
    pub low_price: f64,
    #[serde(default)]
    pub prev_closing_price: f64,
    /// `RISE`, `EVEN` or `FALL`
    #[serde(default)]
    pub change: Option<String>,
    #[serde(default)]
    pub signed_change_rate: Option<f64>,
    #[serde(default)]
    pub acc_trade_volume_24h: Option<f64>,
    /// Milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
}

/// Candle as returned by `/candles/*`, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpbitCandle {
    pub market: String,
    /// Bucket start in UTC, e.g. `2024-01-01T09:00:00`
    pub candle_date_time_utc: String,
    pub opening_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    /// Close of the bucket
    pub trade_price: f64,
    /// Time of the last trade in the bucket, milliseconds since epoch
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub candle_acc_trade_price: f64,
    #[serde(default)]
    pub candle_acc_trade_volume: f64,
    /// Minute unit; absent on day candles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,
}

impl UpbitCandle {
    /// Bucket start time, falling back to the last-trade timestamp
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
            .or_else(|| Utc.timestamp_millis_opt(self.timestamp).single())
    }

    pub fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            datetime: self.datetime()?,
            open: self.opening_price,
            high: self.high_price,
            low: self.low_price,
            close: self.trade_price,
            volume: self.candle_acc_trade_volume,
        })
    }
}

/// Entry of `/market/all`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market: String,
    #[serde(default)]
    pub korean_name: String,
    #[serde(default)]
    pub english_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_warning: Option<String>,
}

/// Response of order creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    /// Exchange order identifier
    pub uuid: String,
    pub side: String,
    pub ord_type: String,
    #[serde(default)]
    pub price: Option<String>,
    /// `wait`, `watch`, `done` or `cancel`
    #[serde(default)]
    pub state: Option<String>,
    pub market: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub remaining_volume: Option<String>,
    #[serde(default)]
    pub executed_volume: Option<String>,
    #[serde(default)]
    pub paid_fee: Option<String>,
    #[serde(default)]
    pub trades_count: Option<u32>,
}

impl OrderResponse {
    pub fn executed_volume_f64(&self) -> Option<f64> {
        self.executed_volume.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Error envelope used by the exchange: `{"error": {"name", "message"}}`
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Deserialize f64 from either a number or a string
fn deserialize_f64_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct F64OrString;

    impl<'de> Visitor<'de> for F64OrString {
        type Value = f64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or a string representing a number")
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v)
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v as f64)
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(v as f64)
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            v.parse().map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(F64OrString)
}
