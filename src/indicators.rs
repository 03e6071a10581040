//! Technical indicators
//!
//! SMA and Bollinger Bands wrap the `ta` crate. RSI is computed manually with
//! Wilder's smoothing because `ta`'s RSI smooths with an EMA and does not
//! match the values traders compare against.
//!
//! Every function returns one entry per input value, `None` until enough
//! history has accumulated.

use ta::indicators::{BollingerBands as TaBB, SimpleMovingAverage};
use ta::Next;

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Calculate Relative Strength Index with Wilder's smoothing
///
/// The first value appears at index `period` (it needs `period` price
/// changes). A window with no losses reads 100; a completely flat window
/// reads 50.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = vec![None; values.len()];
    if values.len() <= period {
        return result;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    // First averages are plain means of the first `period` changes
    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;
    result[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    // Wilder's smoothing: avg = (prev_avg * (period - 1) + current) / period
    for (i, &change) in changes.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (period - 1) as f64 + change.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + (-change).max(0.0)) / period as f64;
        result[i + 1] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

/// Calculate Bollinger Bands using ta crate (population standard deviation)
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let mut indicator = match TaBB::new(period, num_std) {
        Ok(i) => i,
        Err(_) => {
            return (
                vec![None; values.len()],
                vec![None; values.len()],
                vec![None; values.len()],
            )
        }
    };

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            upper.push(Some(bb.upper));
            middle.push(Some(bb.average));
            lower.push(Some(bb.lower));
        } else {
            upper.push(None);
            middle.push(None);
            lower.push(None);
        }
    }

    (upper, middle, lower)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert!(result[0].is_none());
        assert!(result[1].is_none());
        assert_relative_eq!(result[2].unwrap(), 2.0);
        assert_relative_eq!(result[3].unwrap(), 3.0);
        assert_relative_eq!(result[4].unwrap(), 4.0);
    }

    #[test]
    fn test_sma_edge_cases() {
        assert!(sma(&[], 3).is_empty());
        assert!(sma(&[1.0, 2.0], 0).is_empty());
        assert!(sma(&[1.0, 2.0], 3).iter().all(Option::is_none));
    }

    #[test]
    fn test_rsi_bounds_and_extremes() {
        let rising: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let result = rsi(&rising, 14);
        assert!(result[13].is_none());
        assert_relative_eq!(result[14].unwrap(), 100.0);

        let falling: Vec<f64> = (1..=30).rev().map(|x| x as f64).collect();
        assert_relative_eq!(rsi(&falling, 14)[29].unwrap(), 0.0);

        let flat = vec![10.0; 20];
        assert_relative_eq!(rsi(&flat, 14)[19].unwrap(), 50.0);
    }

    #[test]
    fn test_rsi_wilder_smoothing() {
        // two up moves of 1, one down move of 1, period 2
        let values = vec![10.0, 11.0, 12.0, 11.0];
        let result = rsi(&values, 2);

        // first: gains (1, 1), losses (0, 0) -> 100
        assert_relative_eq!(result[2].unwrap(), 100.0);
        // then: avg_gain = (1*1 + 0)/2 = 0.5, avg_loss = (0*1 + 1)/2 = 0.5 -> 50
        assert_relative_eq!(result[3].unwrap(), 50.0);
    }

    #[test]
    fn test_rsi_stays_in_range() {
        let values: Vec<f64> = (0..100)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        for v in rsi(&values, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_bollinger_bands() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (upper, middle, lower) = bollinger_bands(&values, 8, 2.0);

        assert!(upper[6].is_none());
        // mean 5, population std dev 2
        assert_relative_eq!(middle[7].unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(upper[7].unwrap(), 9.0, epsilon = 1e-9);
        assert_relative_eq!(lower[7].unwrap(), 1.0, epsilon = 1e-9);
    }
}
