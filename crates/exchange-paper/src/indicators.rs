//! Indicators computed from a close series, oldest first.

/// Wilder RSI of the last close. `None` until `period + 1` closes are available.
///
/// Seeds average gain/loss with the simple mean of the first `period`
/// changes, then applies Wilder smoothing. A flat series reads 50.
#[must_use]
pub fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    if changes.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let (seed, rest) = changes.split_at(period);
    let n = period as f64;
    let mut avg_gain = seed.iter().filter(|c| **c > 0.0).sum::<f64>() / n;
    let mut avg_loss = -seed.iter().filter(|c| **c < 0.0).sum::<f64>() / n;

    for &change in rest {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
    }

    Some(rsi_from_averages(avg_gain, avg_loss))
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Population standard deviation of the last `window` close-to-close returns,
/// in percent. `None` until `window + 1` closes are available.
#[must_use]
pub fn realized_volatility_pct(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window + 1 {
        return None;
    }

    let tail = &closes[closes.len() - window - 1..];
    let returns: Vec<f64> = tail
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    if returns.is_empty() {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt())
}

/// Percentage change from `from` to `to`.
#[must_use]
pub fn change_pct(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn rsi_needs_period_plus_one_closes() {
        assert!(wilder_rsi(&[1.0, 2.0, 3.0], 3).is_none());
        assert!(wilder_rsi(&[1.0, 2.0, 3.0, 4.0], 3).is_some());
    }

    #[test]
    fn rsi_extremes() {
        assert_approx(wilder_rsi(&[100.0, 101.0, 102.0, 103.0], 3).unwrap(), 100.0);
        assert_approx(wilder_rsi(&[103.0, 102.0, 101.0, 100.0], 3).unwrap(), 0.0);
        assert_approx(wilder_rsi(&[100.0; 5], 3).unwrap(), 50.0);
    }

    #[test]
    fn rsi_wilder_smoothing() {
        // seed: +2, -1 -> avg gain 1.0, avg loss 0.5
        // next: +1 -> gain (1*1 + 1)/2 = 1.0, loss (0.5*1 + 0)/2 = 0.25
        let rsi = wilder_rsi(&[10.0, 12.0, 11.0, 12.0], 2).unwrap();
        assert_approx(rsi, 100.0 - 100.0 / (1.0 + 1.0 / 0.25));
    }

    #[test]
    fn volatility_is_population_stdev_in_percent() {
        // returns: +10%, -10%, +10%
        let closes = [100.0, 110.0, 99.0, 108.9];
        let vol = realized_volatility_pct(&closes, 3).unwrap();
        assert_approx(vol, (800.0_f64 / 9.0).sqrt());
    }

    #[test]
    fn volatility_uses_only_the_window() {
        let mut closes = vec![100.0, 200.0, 50.0];
        closes.extend([100.0; 5]);
        assert_approx(realized_volatility_pct(&closes, 4).unwrap(), 0.0);
        assert!(realized_volatility_pct(&closes, 10).is_none());
    }

    #[test]
    fn change_pct_handles_zero_base() {
        assert_approx(change_pct(100.0, 105.0), 5.0);
        assert_approx(change_pct(0.0, 5.0), 0.0);
    }
}
