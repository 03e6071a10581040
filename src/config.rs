//! Configuration management
//!
//! `AppConfig` drives the service itself and is loaded from an optional JSON
//! file with environment variable overrides. `TradingConfig` arrives with each
//! `start` request and is validated before a session is created.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::common::RateLimiterConfig;
use crate::error::{TradingError, TradingResult};

/// Candle sizes offered by the exchange
pub const MINUTE_UNITS: [u32; 8] = [1, 3, 5, 10, 15, 30, 60, 240];

/// Upper bound of candles per request
pub const MAX_CANDLE_COUNT: u32 = 200;

/// Shortest allowed cycle interval
pub const MIN_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// Service configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub exchange: ExchangeConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => AppConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config JSON")
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(url) = std::env::var("UPBIT_API_URL") {
            self.exchange.base_url = url;
        }
        if let Some(secs) = std::env::var("UPBIT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.exchange.timeout_secs = secs;
        }
        if let Ok(dir) = std::env::var("LOG_DIR") {
            self.logging.dir = dir;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Exchange connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Requests per second for public market data
    pub quotation_rate_limit: usize,
    /// Requests per second for signed account endpoints
    pub exchange_rate_limit: usize,
    /// Requests per second for order placement
    pub order_rate_limit: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            base_url: "https://api.upbit.com/v1".to_string(),
            timeout_secs: 30,
            quotation_rate_limit: 10,
            exchange_rate_limit: 30,
            order_rate_limit: 8,
        }
    }
}

impl ExchangeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_limiter(&self, requests_per_second: usize) -> RateLimiterConfig {
        RateLimiterConfig::default().with_rate(requests_per_second)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            dir: "logs".to_string(),
        }
    }
}

// =============================================================================
// Per-session trading configuration
// =============================================================================

/// Candle granularity: `minutes/{unit}` or `days`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Granularity {
    Minutes(u32),
    Days,
}

impl Granularity {
    pub fn minutes(unit: u32) -> TradingResult<Self> {
        if MINUTE_UNITS.contains(&unit) {
            Ok(Granularity::Minutes(unit))
        } else {
            Err(TradingError::validation(format!(
                "unsupported minute unit {unit} (expected one of {MINUTE_UNITS:?})"
            )))
        }
    }

    /// Path segment below `/candles/`
    pub fn path(&self) -> String {
        match self {
            Granularity::Minutes(unit) => format!("minutes/{unit}"),
            Granularity::Days => "days".to_string(),
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Minutes(1)
    }
}

impl FromStr for Granularity {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            None if s == "days" => Ok(Granularity::Days),
            Some(("minutes", unit)) => {
                let unit = unit
                    .parse()
                    .map_err(|_| TradingError::validation(format!("bad minute unit '{unit}'")))?;
                Granularity::minutes(unit)
            }
            _ => Err(TradingError::validation(format!(
                "unknown candle granularity '{s}'"
            ))),
        }
    }
}

impl TryFrom<String> for Granularity {
    type Error = TradingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.path()
    }
}

/// Which indicators vote, how votes combine, and indicator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategyConfig {
    #[serde(rename = "useMA", alias = "useMAStrategy", alias = "useMa")]
    pub use_ma: bool,
    #[serde(rename = "useRSI", alias = "useRSIStrategy", alias = "useRsi")]
    pub use_rsi: bool,
    #[serde(alias = "useBollingerStrategy")]
    pub use_bollinger: bool,
    /// All enabled indicators must agree before trading
    pub require_confirmation: bool,
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig {
            use_ma: true,
            use_rsi: true,
            use_bollinger: true,
            require_confirmation: false,
            ma_short_period: 5,
            ma_long_period: 20,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> TradingResult<()> {
        if self.ma_short_period == 0 || self.ma_short_period >= self.ma_long_period {
            return Err(TradingError::validation(format!(
                "moving average periods must satisfy 0 < short ({}) < long ({})",
                self.ma_short_period, self.ma_long_period
            )));
        }
        if self.rsi_period < 2 {
            return Err(TradingError::validation("rsiPeriod must be at least 2"));
        }
        if !(0.0 < self.rsi_oversold
            && self.rsi_oversold < self.rsi_overbought
            && self.rsi_overbought < 100.0)
        {
            return Err(TradingError::validation(format!(
                "RSI thresholds must satisfy 0 < oversold ({}) < overbought ({}) < 100",
                self.rsi_oversold, self.rsi_overbought
            )));
        }
        if self.bollinger_period < 2 {
            return Err(TradingError::validation("bollingerPeriod must be at least 2"));
        }
        if !(self.bollinger_std_dev > 0.0) {
            return Err(TradingError::validation("bollingerStdDev must be positive"));
        }
        Ok(())
    }

    /// Longest history any enabled indicator needs to produce a signal
    pub fn required_history(&self) -> usize {
        let mut needed = 0;
        if self.use_ma {
            // crossover compares the last two long averages
            needed = needed.max(self.ma_long_period + 1);
        }
        if self.use_rsi {
            needed = needed.max(self.rsi_period + 1);
        }
        if self.use_bollinger {
            needed = needed.max(self.bollinger_period);
        }
        needed
    }
}

/// Order sizing and exit limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskConfig {
    /// Quote-currency cap per order
    pub max_order_amount: f64,
    /// Fraction of available quote balance risked per trade, in (0, 1]
    pub portfolio_ratio: f64,
    #[serde(alias = "stopLossPct")]
    pub stop_loss: f64,
    #[serde(alias = "takeProfitPct")]
    pub take_profit: f64,
    /// Exchange minimum order notional
    pub min_order_amount: f64,
    pub allow_pyramiding: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_order_amount: 100_000.0,
            portfolio_ratio: 0.1,
            stop_loss: 0.05,
            take_profit: 0.1,
            min_order_amount: 5_000.0,
            allow_pyramiding: false,
        }
    }
}

impl RiskConfig {
    /// Set the per-order cap in quote currency
    pub fn with_max_order_amount(mut self, amount: f64) -> Self {
        self.max_order_amount = amount;
        self
    }

    /// Set the fraction of quote balance used per trade
    pub fn with_portfolio_ratio(mut self, ratio: f64) -> Self {
        self.portfolio_ratio = ratio;
        self
    }

    /// Set stop-loss and take-profit as fractions of entry price
    pub fn with_exits(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }

    pub fn with_min_order_amount(mut self, amount: f64) -> Self {
        self.min_order_amount = amount;
        self
    }

    pub fn with_pyramiding(mut self, allow: bool) -> Self {
        self.allow_pyramiding = allow;
        self
    }

    pub fn validate(&self) -> TradingResult<()> {
        if !(self.max_order_amount > 0.0) || !self.max_order_amount.is_finite() {
            return Err(TradingError::validation(format!(
                "maxOrderAmount must be > 0, got {}",
                self.max_order_amount
            )));
        }
        for (name, value) in [
            ("portfolioRatio", self.portfolio_ratio),
            ("stopLoss", self.stop_loss),
            ("takeProfit", self.take_profit),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(TradingError::validation(format!(
                    "{name} must lie in (0, 1], got {value}"
                )));
            }
        }
        if !(self.min_order_amount >= 0.0) {
            return Err(TradingError::validation(format!(
                "minOrderAmount must be >= 0, got {}",
                self.min_order_amount
            )));
        }
        Ok(())
    }
}

/// Everything a `start` call configures for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TradingConfig {
    #[serde(alias = "strategyConfig")]
    pub strategy: StrategyConfig,
    pub risk_management: RiskConfig,
    /// Paper trading: fills are simulated, nothing is sent to the exchange
    pub test_mode: bool,
    pub paper_balance: f64,
    /// Cycle interval in milliseconds
    pub interval: u64,
    pub granularity: Granularity,
    pub candle_count: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            strategy: StrategyConfig::default(),
            risk_management: RiskConfig::default(),
            test_mode: true,
            paper_balance: 1_000_000.0,
            interval: 60_000,
            granularity: Granularity::default(),
            candle_count: 100,
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> TradingResult<()> {
        self.strategy.validate()?;
        self.risk_management.validate()?;

        if self.interval < MIN_INTERVAL_MS {
            return Err(TradingError::validation(format!(
                "interval must be at least {MIN_INTERVAL_MS}ms, got {}",
                self.interval
            )));
        }
        if self.candle_count == 0 || self.candle_count > MAX_CANDLE_COUNT {
            return Err(TradingError::validation(format!(
                "candleCount must be in 1..={MAX_CANDLE_COUNT}, got {}",
                self.candle_count
            )));
        }
        let needed = self.strategy.required_history();
        if (self.candle_count as usize) < needed {
            return Err(TradingError::validation(format!(
                "candleCount {} is shorter than the {needed} candles the enabled indicators need",
                self.candle_count
            )));
        }
        if self.test_mode && !(self.paper_balance >= 0.0) {
            return Err(TradingError::validation("paperBalance must be >= 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}
