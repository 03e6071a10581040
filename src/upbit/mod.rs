//! Upbit Exchange API Library
//!
//! Signed REST access to the Upbit exchange.
//!
//! # Features
//!
//! - **Signed requests**: HMAC-SHA512 over the canonical query string
//! - **Rate Limiting**: separate budgets for quotation, exchange and order calls
//! - **Typed errors**: auth, rate-limit (with retry-after), upstream and network failures
//! - **No hidden retries**: retry policy belongs to the caller
//!
//! # Quick Start
//!
//! ```no_run
//! use upbit_autotrader::upbit::{Credentials, UpbitClient};
//! use upbit_autotrader::types::Market;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = UpbitClient::new()?;
//!
//!     let market = Market::parse("KRW-BTC")?;
//!     let ticker = client.ticker(&market).await?;
//!     println!("KRW-BTC: {}", ticker.trade_price);
//!
//!     let credentials = Credentials::new("access_key", "secret_key");
//!     for account in client.accounts(&credentials).await? {
//!         println!("{}: {}", account.currency, account.balance);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`auth`]: credentials, canonical query strings and signatures
//! - [`client`]: HTTP client and typed endpoints
//! - [`types`]: request and response models

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{sign_payload, Credentials, Params};
pub use client::{ClientConfig, UpbitClient, API_BASE_URL, MAX_RETRY_AFTER};
pub use types::{Account, MarketInfo, OrderResponse, Ticker, UpbitCandle};
