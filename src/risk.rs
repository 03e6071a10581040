//! Risk management
//!
//! Every order the engine places passes through [`RiskManager`]:
//!
//! - BUY notional = `min(maxOrderAmount, quote balance * portfolioRatio)`,
//!   truncated to the market's quote precision and rejected below the
//!   exchange minimum
//! - SELL is a full exit of the open position, never more than the base
//!   balance the account reports
//! - Stop-loss and take-profit are checked every cycle, before and
//!   independent of the signal path
//!
//! Amounts are in the market's quote currency; no conversion is performed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RiskConfig;
use crate::error::TradingResult;
use crate::types::{to_decimal, Market, Order, Position, Signal};

/// Decimal places used for base-currency volumes
pub const VOLUME_PRECISION: u32 = 8;

/// Balances relevant to one market
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccountBalance {
    /// Available quote currency (e.g. KRW)
    pub quote: f64,
    /// Available base currency (e.g. BTC)
    pub base: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum RejectReason {
    NoSignal,
    PositionOpen,
    NoPosition,
    BelowMinimum { notional: f64, minimum: f64 },
    NothingToSell,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoSignal => write!(f, "no actionable signal"),
            RejectReason::PositionOpen => {
                write!(f, "a position is already open and pyramiding is disabled")
            }
            RejectReason::NoPosition => write!(f, "no open position to sell"),
            RejectReason::BelowMinimum { notional, minimum } => write!(
                f,
                "order notional {notional:.2} is below the minimum {minimum:.2}"
            ),
            RejectReason::NothingToSell => write!(f, "sell volume rounds to zero"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Order(Order),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop loss"),
            ExitReason::TakeProfit => write!(f, "take profit"),
        }
    }
}

/// Sizes and gates orders against a validated [`RiskConfig`]
#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> TradingResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Turn a combined signal into an order or a rejection
    pub fn authorize(
        &self,
        signal: Signal,
        market: &Market,
        balance: &AccountBalance,
        position: Option<&Position>,
    ) -> Authorization {
        match signal {
            Signal::Buy => self.authorize_buy(market, balance, position),
            Signal::Sell => match position {
                Some(position) => self.exit_order(position, balance),
                None => Authorization::Rejected(RejectReason::NoPosition),
            },
            Signal::Hold => Authorization::Rejected(RejectReason::NoSignal),
        }
    }

    fn authorize_buy(
        &self,
        market: &Market,
        balance: &AccountBalance,
        position: Option<&Position>,
    ) -> Authorization {
        if position.is_some() && !self.config.allow_pyramiding {
            return Authorization::Rejected(RejectReason::PositionOpen);
        }

        let notional = self.buy_notional(balance.quote);
        let below_minimum = Authorization::Rejected(RejectReason::BelowMinimum {
            notional,
            minimum: self.config.min_order_amount,
        });
        if notional < self.config.min_order_amount {
            return below_minimum;
        }

        match to_decimal(notional, market.quote_precision()) {
            Some(amount) if !amount.is_zero() => {
                Authorization::Order(Order::market_buy(market.clone(), amount))
            }
            _ => below_minimum,
        }
    }

    /// Quote amount to spend on a BUY: the smaller of the cap and the ratio of balance
    pub fn buy_notional(&self, quote_balance: f64) -> f64 {
        let by_ratio = quote_balance.max(0.0) * self.config.portfolio_ratio;
        by_ratio.min(self.config.max_order_amount)
    }

    /// Full exit of `position`, clipped to the reported base balance
    pub fn exit_order(&self, position: &Position, balance: &AccountBalance) -> Authorization {
        let volume = if balance.base > 0.0 {
            position.volume.min(balance.base)
        } else {
            position.volume
        };

        match to_decimal(volume, VOLUME_PRECISION) {
            Some(volume) if !volume.is_zero() => {
                Authorization::Order(Order::market_sell(position.market.clone(), volume))
            }
            _ => Authorization::Rejected(RejectReason::NothingToSell),
        }
    }

    /// Stop-loss / take-profit trigger for the open position at `price`
    pub fn check_exit(&self, position: Option<&Position>, price: f64) -> Option<ExitReason> {
        let position = position?;
        let change = position.unrealized_return(price);

        if change <= -self.config.stop_loss {
            Some(ExitReason::StopLoss)
        } else if change >= self.config.take_profit {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}
