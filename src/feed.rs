//! Market data feed
//!
//! Thin layer over an [`Exchange`] that turns exchange candles into
//! chronological [`Candle`] sequences. Nothing is cached here; sessions keep
//! their own rolling [`CandleWindow`].

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{Granularity, MAX_CANDLE_COUNT};
use crate::error::{TradingError, TradingResult};
use crate::exchange::Exchange;
use crate::types::{Candle, Market};
use crate::upbit::types::Ticker;

pub struct MarketDataFeed<E: Exchange> {
    exchange: Arc<E>,
}

impl<E: Exchange> Clone for MarketDataFeed<E> {
    fn clone(&self) -> Self {
        Self {
            exchange: Arc::clone(&self.exchange),
        }
    }
}

impl<E: Exchange> MarketDataFeed<E> {
    pub fn new(exchange: Arc<E>) -> Self {
        Self { exchange }
    }

    pub async fn ticker(&self, market: &Market) -> TradingResult<Ticker> {
        self.exchange.ticker(market).await
    }

    /// Latest `count` candles, oldest first
    pub async fn candles(
        &self,
        market: &Market,
        granularity: Granularity,
        count: u32,
    ) -> TradingResult<Vec<Candle>> {
        if count == 0 || count > MAX_CANDLE_COUNT {
            return Err(TradingError::validation(format!(
                "candle count must be in 1..={MAX_CANDLE_COUNT}, got {count}"
            )));
        }

        let raw = self.exchange.candles(market, granularity, count).await?;
        let received = raw.len();

        let mut candles: Vec<Candle> = raw.iter().filter_map(|c| c.to_candle()).collect();
        if candles.len() < received {
            warn!(
                %market,
                dropped = received - candles.len(),
                "Dropped candles with unreadable timestamps"
            );
        }
        candles.sort_by_key(|c| c.datetime);

        debug!(%market, granularity = %granularity.path(), count = candles.len(), "Fetched candles");
        Ok(candles)
    }
}

/// Bounded chronological candle buffer
///
/// Merging a fresh batch replaces the still-forming last bucket and appends
/// newer buckets; older buckets are kept from earlier merges until the
/// capacity evicts them.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            candles: VecDeque::with_capacity(capacity),
        }
    }

    /// Merge a chronological batch into the window
    pub fn merge(&mut self, batch: &[Candle]) {
        for candle in batch {
            match self.candles.back() {
                Some(last) if candle.datetime < last.datetime => {
                    // history is append-only
                    continue;
                }
                Some(last) if candle.datetime == last.datetime => {
                    if let Some(last) = self.candles.back_mut() {
                        *last = candle.clone();
                    }
                }
                _ => self.candles.push_back(candle.clone()),
            }
        }

        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
    }

    /// Contiguous chronological copy for indicator math
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(minute: i64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            datetime: start + Duration::minutes(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_window_appends_in_order() {
        let mut window = CandleWindow::new(10);
        window.merge(&[candle(0, 1.0), candle(1, 2.0), candle(2, 3.0)]);

        assert_eq!(window.len(), 3);
        assert_eq!(window.last().unwrap().close, 3.0);
    }

    #[test]
    fn test_window_replaces_forming_bucket() {
        let mut window = CandleWindow::new(10);
        window.merge(&[candle(0, 1.0), candle(1, 2.0)]);
        window.merge(&[candle(1, 2.5), candle(2, 3.0)]);

        let closes: Vec<f64> = window.to_vec().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.5, 3.0]);
    }

    #[test]
    fn test_window_ignores_stale_candles() {
        let mut window = CandleWindow::new(10);
        window.merge(&[candle(5, 5.0)]);
        window.merge(&[candle(3, 3.0), candle(4, 4.0)]);

        assert_eq!(window.len(), 1);
        assert_eq!(window.last().unwrap().close, 5.0);
    }

    #[test]
    fn test_window_evicts_oldest_beyond_capacity() {
        let mut window = CandleWindow::new(3);
        let batch: Vec<Candle> = (0..5).map(|i| candle(i, i as f64)).collect();
        window.merge(&batch);

        assert_eq!(window.len(), 3);
        assert_eq!(window.to_vec()[0].close, 2.0);
        assert_eq!(window.capacity(), 3);
    }
}
