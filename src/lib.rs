//! Upbit Auto-Trader
//!
//! An automated trading engine for the Upbit exchange: signed REST access,
//! periodic market data polling, indicator-based signals (moving-average
//! crossover, RSI, Bollinger bands), risk-bounded order placement and a
//! per-user, per-market session lifecycle exposed over HTTP.

pub mod common;
pub mod config;
pub mod cycle;
pub mod error;
pub mod exchange;
pub mod feed;
pub mod indicators;
pub mod risk;
pub mod server;
pub mod session;
pub mod signal;
pub mod types;
pub mod upbit;

pub use config::{AppConfig, RiskConfig, StrategyConfig, TradingConfig};
pub use error::{ErrorKind, TradingError, TradingResult};
pub use exchange::{Exchange, ExchangeRequest};
pub use session::{SessionController, SessionSnapshot, SessionStatus};
pub use types::*;
