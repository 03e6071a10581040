//! One evaluation cycle
//!
//! fetch candles → stop-loss / take-profit check → signal evaluation →
//! risk authorization → order submission → position update.
//!
//! In test mode orders are filled against a [`PaperAccount`] at the latest
//! close and nothing is sent to the exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TradingConfig;
use crate::error::TradingError;
use crate::exchange::Exchange;
use crate::feed::{CandleWindow, MarketDataFeed};
use crate::risk::{AccountBalance, Authorization, ExitReason, RejectReason, RiskManager};
use crate::signal::{evaluate, IndicatorSignal};
use crate::types::{to_f64, Market, Order, Position, Side, Signal};
use crate::upbit::types::Account;
use crate::upbit::Credentials;

/// Simulated balances for test mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperAccount {
    pub quote: f64,
    pub base: f64,
}

impl PaperAccount {
    pub fn new(quote: f64) -> Self {
        Self { quote, base: 0.0 }
    }

    fn balance(&self) -> AccountBalance {
        AccountBalance {
            quote: self.quote,
            base: self.base,
        }
    }
}

/// Mutable per-session state carried from cycle to cycle
#[derive(Debug, Clone)]
pub struct CycleState {
    pub window: CandleWindow,
    pub position: Option<Position>,
    pub paper: Option<PaperAccount>,
}

impl CycleState {
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            window: CandleWindow::new(config.candle_count as usize),
            position: None,
            paper: config
                .test_mode
                .then(|| PaperAccount::new(config.paper_balance)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionSource {
    Signals,
    StopLoss,
    TakeProfit,
}

impl From<ExitReason> for DecisionSource {
    fn from(reason: ExitReason) -> Self {
        match reason {
            ExitReason::StopLoss => DecisionSource::StopLoss,
            ExitReason::TakeProfit => DecisionSource::TakeProfit,
        }
    }
}

/// What a cycle decided and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub signal: Signal,
    pub source: DecisionSource,
    pub indicators: Vec<IndicatorSignal>,
    /// Latest close the decision was made at
    pub price: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Combined signal was HOLD and no exit triggered
    Held,
    Rejected(RejectReason),
    Submitted {
        order: Order,
        order_id: String,
        exit: Option<ExitReason>,
    },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub decision: DecisionRecord,
    pub outcome: CycleOutcome,
}

/// Where in the cycle a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    MarketData,
    Balance,
    Submission,
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStage::MarketData => write!(f, "market data"),
            CycleStage::Balance => write!(f, "balance"),
            CycleStage::Submission => write!(f, "order submission"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleError {
    pub stage: CycleStage,
    pub error: TradingError,
}

impl CycleError {
    fn at(stage: CycleStage) -> impl FnOnce(TradingError) -> CycleError {
        move |error| CycleError { stage, error }
    }

    /// Whether the order may already have reached the exchange
    pub fn during_submission(&self) -> bool {
        self.stage == CycleStage::Submission
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Runs cycles against one exchange; shared by every session
pub struct CycleEngine<E: Exchange> {
    exchange: Arc<E>,
    feed: MarketDataFeed<E>,
}

impl<E: Exchange> CycleEngine<E> {
    pub fn new(exchange: Arc<E>) -> Self {
        Self {
            feed: MarketDataFeed::new(Arc::clone(&exchange)),
            exchange,
        }
    }

    pub async fn run(
        &self,
        market: &Market,
        config: &TradingConfig,
        risk: &RiskManager,
        credentials: &Credentials,
        state: &mut CycleState,
    ) -> Result<CycleReport, CycleError> {
        let candles = self
            .feed
            .candles(market, config.granularity, config.candle_count)
            .await
            .map_err(CycleError::at(CycleStage::MarketData))?;
        state.window.merge(&candles);

        let price = match state.window.last() {
            Some(candle) if candle.close > 0.0 => candle.close,
            _ => {
                return Err(CycleError {
                    stage: CycleStage::MarketData,
                    error: TradingError::Upstream {
                        status: 200,
                        message: format!("no usable candles for {market}"),
                    },
                })
            }
        };

        // exits run before, and regardless of, the signal path
        let exit = risk.check_exit(state.position.as_ref(), price);
        let decision = match exit {
            Some(reason) => {
                info!(%market, price, "{} triggered", reason);
                DecisionRecord {
                    signal: Signal::Sell,
                    source: reason.into(),
                    indicators: Vec::new(),
                    price,
                    at: Utc::now(),
                }
            }
            None => {
                let evaluated = evaluate(&state.window.to_vec(), &config.strategy);
                DecisionRecord {
                    signal: evaluated.combined,
                    source: DecisionSource::Signals,
                    indicators: evaluated.signals,
                    price,
                    at: Utc::now(),
                }
            }
        };
        debug!(%market, signal = ?decision.signal, source = ?decision.source, price, "Cycle decision");

        if decision.signal == Signal::Hold {
            return Ok(CycleReport {
                decision,
                outcome: CycleOutcome::Held,
            });
        }

        let balance = match &state.paper {
            Some(paper) => paper.balance(),
            None => {
                let accounts = self
                    .exchange
                    .accounts(credentials)
                    .await
                    .map_err(CycleError::at(CycleStage::Balance))?;
                balance_for(&accounts, market)
            }
        };

        let authorization = match (exit, state.position.as_ref()) {
            (Some(_), Some(position)) => risk.exit_order(position, &balance),
            _ => risk.authorize(decision.signal, market, &balance, state.position.as_ref()),
        };

        let order = match authorization {
            Authorization::Order(order) => order,
            Authorization::Rejected(reason) => {
                info!(%market, "Order rejected: {}", reason);
                return Ok(CycleReport {
                    decision,
                    outcome: CycleOutcome::Rejected(reason),
                });
            }
        };

        let (order_id, executed_volume) = match state.paper.as_mut() {
            Some(paper) => fill_paper(paper, &order, price),
            None => {
                let response = self
                    .exchange
                    .create_order(&order, credentials)
                    .await
                    .map_err(CycleError::at(CycleStage::Submission))?;
                let executed = response.executed_volume_f64().filter(|v| *v > 0.0);
                (response.uuid, executed)
            }
        };

        update_position(state, &order, &order_id, executed_volume, price);
        info!(
            %market,
            side = order.side.as_wire(),
            order_id = %order_id,
            paper = state.paper.is_some(),
            "Order submitted"
        );

        Ok(CycleReport {
            decision,
            outcome: CycleOutcome::Submitted {
                order,
                order_id,
                exit,
            },
        })
    }
}

/// Pick the quote and base balances of `market` out of the account list
pub fn balance_for(accounts: &[Account], market: &Market) -> AccountBalance {
    let find = |currency: &str| {
        accounts
            .iter()
            .find(|a| a.currency == currency)
            .map(|a| a.balance)
            .unwrap_or(0.0)
    };
    AccountBalance {
        quote: find(market.quote()),
        base: find(market.base()),
    }
}

/// Fill `order` at `price` against the paper ledger
fn fill_paper(paper: &mut PaperAccount, order: &Order, price: f64) -> (String, Option<f64>) {
    let order_id = format!("paper-{}", uuid::Uuid::new_v4());
    match order.side {
        Side::Buy => {
            let notional = order.price.map(to_f64).unwrap_or(0.0);
            let volume = notional / price;
            paper.quote -= notional;
            paper.base += volume;
            (order_id, Some(volume))
        }
        Side::Sell => {
            let volume = order.volume.map(to_f64).unwrap_or(0.0).min(paper.base);
            paper.base -= volume;
            paper.quote += volume * price;
            (order_id, Some(volume))
        }
    }
}

fn update_position(
    state: &mut CycleState,
    order: &Order,
    order_id: &str,
    executed_volume: Option<f64>,
    price: f64,
) {
    match order.side {
        Side::Buy => {
            let notional = order.price.map(to_f64).unwrap_or(0.0);
            let volume = executed_volume.unwrap_or(notional / price);
            if volume <= 0.0 {
                warn!(market = %order.market, "Buy filled with zero volume; position unchanged");
                return;
            }
            let entry_price = notional / volume;

            state.position = Some(match state.position.take() {
                // pyramiding: average into the existing position
                Some(existing) => {
                    let total_volume = existing.volume + volume;
                    Position {
                        entry_price: (existing.cost_basis() + notional) / total_volume,
                        volume: total_volume,
                        order_id: Some(order_id.to_string()),
                        ..existing
                    }
                }
                None => Position {
                    market: order.market.clone(),
                    entry_price,
                    volume,
                    opened_at: Utc::now(),
                    order_id: Some(order_id.to_string()),
                },
            });
        }
        Side::Sell => {
            state.position = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use rust_decimal_macros::dec;

    fn krw_btc() -> Market {
        Market::parse("KRW-BTC").unwrap()
    }

    fn paper_state() -> CycleState {
        CycleState::new(&TradingConfig::default())
    }

    #[test]
    fn test_balance_for_market() {
        let accounts = vec![
            Account {
                currency: "KRW".into(),
                balance: 250_000.0,
                locked: 0.0,
                avg_buy_price: 0.0,
                unit_currency: Some("KRW".into()),
            },
            Account {
                currency: "BTC".into(),
                balance: 0.01,
                locked: 0.0,
                avg_buy_price: 90_000_000.0,
                unit_currency: Some("KRW".into()),
            },
        ];
        let balance = balance_for(&accounts, &krw_btc());
        assert_eq!(balance.quote, 250_000.0);
        assert_eq!(balance.base, 0.01);

        let eth = balance_for(&accounts, &Market::parse("KRW-ETH").unwrap());
        assert_eq!(eth.base, 0.0);
    }

    #[test]
    fn test_paper_state_seeded_from_config() {
        let state = paper_state();
        assert_eq!(state.paper, Some(PaperAccount::new(1_000_000.0)));

        let live = CycleState::new(&TradingConfig {
            test_mode: false,
            ..TradingConfig::default()
        });
        assert!(live.paper.is_none());
        assert_eq!(live.window.capacity(), 100);
    }

    #[test]
    fn test_paper_round_trip_updates_ledger_and_position() {
        let mut state = paper_state();
        let buy = Order::market_buy(krw_btc(), dec!(100000));

        let paper = state.paper.as_mut().unwrap();
        let (id, volume) = fill_paper(paper, &buy, 50_000.0);
        assert!(id.starts_with("paper-"));
        assert_eq!(volume, Some(2.0));
        update_position(&mut state, &buy, &id, volume, 50_000.0);

        let position = state.position.clone().unwrap();
        assert_eq!(position.volume, 2.0);
        assert_eq!(position.entry_price, 50_000.0);
        assert_eq!(state.paper.unwrap().quote, 900_000.0);

        let sell = Order::market_sell(krw_btc(), dec!(2));
        let paper = state.paper.as_mut().unwrap();
        let (id, volume) = fill_paper(paper, &sell, 55_000.0);
        update_position(&mut state, &sell, &id, volume, 55_000.0);

        assert!(state.position.is_none());
        let paper = state.paper.unwrap();
        assert_eq!(paper.base, 0.0);
        assert_eq!(paper.quote, 1_010_000.0);
    }

    #[test]
    fn test_buy_volume_estimated_without_execution_report() {
        let mut state = CycleState::new(&TradingConfig {
            strategy: StrategyConfig::default(),
            test_mode: false,
            ..TradingConfig::default()
        });
        let buy = Order::market_buy(krw_btc(), dec!(10000));
        update_position(&mut state, &buy, "uuid-1", None, 40_000.0);

        let position = state.position.unwrap();
        assert_eq!(position.volume, 0.25);
        assert_eq!(position.order_id.as_deref(), Some("uuid-1"));
    }

    #[test]
    fn test_pyramiding_averages_entry() {
        let mut state = paper_state();
        let buy = Order::market_buy(krw_btc(), dec!(1000));
        update_position(&mut state, &buy, "a", Some(10.0), 100.0);
        update_position(&mut state, &buy, "b", Some(5.0), 200.0);

        let position = state.position.unwrap();
        assert_eq!(position.volume, 15.0);
        assert!((position.entry_price - 2000.0 / 15.0).abs() < 1e-9);
    }
}
