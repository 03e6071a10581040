//! Signal evaluation
//!
//! [`evaluate`] turns a chronological candle history into one vote per
//! enabled indicator and a combined decision. It is a pure function: the same
//! candles and configuration always yield the same [`Decision`].

use serde::{Deserialize, Serialize};

use crate::config::StrategyConfig;
use crate::indicators::{bollinger_bands, rsi, sma};
use crate::types::{Candle, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Indicator {
    MovingAverage,
    Rsi,
    Bollinger,
}

/// Vote of one indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSignal {
    pub indicator: Indicator,
    pub signal: Signal,
}

/// Per-indicator votes and the combined result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub signals: Vec<IndicatorSignal>,
    pub combined: Signal,
}

/// Evaluate every enabled indicator on `candles` (oldest first) and combine the votes
pub fn evaluate(candles: &[Candle], config: &StrategyConfig) -> Decision {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut signals = Vec::with_capacity(3);

    if config.use_ma {
        signals.push(IndicatorSignal {
            indicator: Indicator::MovingAverage,
            signal: ma_crossover_signal(&closes, config.ma_short_period, config.ma_long_period),
        });
    }
    if config.use_rsi {
        signals.push(IndicatorSignal {
            indicator: Indicator::Rsi,
            signal: rsi_signal(
                &closes,
                config.rsi_period,
                config.rsi_oversold,
                config.rsi_overbought,
            ),
        });
    }
    if config.use_bollinger {
        signals.push(IndicatorSignal {
            indicator: Indicator::Bollinger,
            signal: bollinger_signal(&closes, config.bollinger_period, config.bollinger_std_dev),
        });
    }

    let votes: Vec<Signal> = signals.iter().map(|s| s.signal).collect();
    let combined = combine(&votes, config.require_confirmation);

    Decision { signals, combined }
}

/// BUY when the short average crosses above the long one on the last two
/// candles, SELL on the cross below
pub fn ma_crossover_signal(closes: &[f64], short_period: usize, long_period: usize) -> Signal {
    let short = sma(closes, short_period);
    let long = sma(closes, long_period);
    let n = closes.len();
    if n < 2 {
        return Signal::Hold;
    }

    let (prev_short, prev_long, cur_short, cur_long) =
        match (short[n - 2], long[n - 2], short[n - 1], long[n - 1]) {
            (Some(ps), Some(pl), Some(cs), Some(cl)) => (ps, pl, cs, cl),
            _ => return Signal::Hold,
        };

    if prev_short <= prev_long && cur_short > cur_long {
        Signal::Buy
    } else if prev_short >= prev_long && cur_short < cur_long {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

pub fn rsi_signal(closes: &[f64], period: usize, oversold: f64, overbought: f64) -> Signal {
    match rsi(closes, period).last().copied().flatten() {
        Some(value) if value < oversold => Signal::Buy,
        Some(value) if value > overbought => Signal::Sell,
        _ => Signal::Hold,
    }
}

pub fn bollinger_signal(closes: &[f64], period: usize, num_std: f64) -> Signal {
    let (upper, _, lower) = bollinger_bands(closes, period, num_std);
    let (Some(&close), Some(Some(upper)), Some(Some(lower))) =
        (closes.last(), upper.last().copied(), lower.last().copied())
    else {
        return Signal::Hold;
    };

    if close <= lower {
        Signal::Buy
    } else if close >= upper {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Combine indicator votes
///
/// With confirmation every vote must agree on BUY or SELL. Without it the
/// strict majority wins and ties resolve to HOLD. No votes means HOLD.
pub fn combine(votes: &[Signal], require_confirmation: bool) -> Signal {
    if votes.is_empty() {
        return Signal::Hold;
    }

    if require_confirmation {
        return match votes[0] {
            Signal::Hold => Signal::Hold,
            first if votes.iter().all(|&v| v == first) => first,
            _ => Signal::Hold,
        };
    }

    let count = |target: Signal| votes.iter().filter(|&&v| v == target).count();
    let (buys, sells, holds) = (count(Signal::Buy), count(Signal::Sell), count(Signal::Hold));

    if buys > sells && buys > holds {
        Signal::Buy
    } else if sells > buys && sells > holds {
        Signal::Sell
    } else {
        Signal::Hold
    }
}
