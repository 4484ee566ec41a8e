//! Common thresholds and helper functions shared across detector modules.

use crate::series::Candle;
use crate::{AnalysisError, Direction, Result};

// ============================================================
// THRESHOLDS
// ============================================================

/// Structure points compared by shift/break detectors
pub const STRUCTURE_LOOKBACK: usize = 3;
/// Break must clear the level by this fraction
pub const BREAK_BUFFER: f64 = 0.001;
/// Events kept per side in detail payloads
pub const KEEP_RECENT: usize = 5;
/// Events counted per side for a bias
pub const BIAS_WINDOW: usize = 3;
/// Relative tolerance when two prices count as the same level
pub const LEVEL_TOLERANCE: f64 = 0.002;
/// Relative move that counts as a strong impulse candle
pub const IMPULSE_MOVE: f64 = 0.01;

// ============================================================
// HELPER FUNCTIONS
// ============================================================

/// Keep the last `n` items, preserving order
#[inline]
pub fn keep_last<T>(mut items: Vec<T>, n: usize) -> Vec<T> {
    let excess = items.len().saturating_sub(n);
    items.drain(..excess);
    items
}

/// `(to - from) / from`, 0.0 for a zero base
#[inline]
pub fn relative_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        0.0
    } else {
        (to - from) / from
    }
}

/// Mean high-low range, 0.0 for an empty slice
#[inline]
pub fn avg_range(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(|c| c.high - c.low).sum::<f64>() / candles.len() as f64
}

#[inline]
pub fn max_high(candles: &[Candle]) -> f64 {
    candles.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max)
}

#[inline]
pub fn min_low(candles: &[Candle]) -> f64 {
    candles.iter().map(|c| c.low).fold(f64::INFINITY, f64::min)
}

/// Bias from per-side event counts, each capped at `window`.
///
/// Bullish only when the capped bullish count is strictly larger; otherwise
/// bearish, so equal counts lean bearish. No events at all is neutral.
pub fn capped_bias(bullish: usize, bearish: usize, window: usize) -> Direction {
    if bullish == 0 && bearish == 0 {
        Direction::Neutral
    } else if bullish.min(window) > bearish.min(window) {
        Direction::Bullish
    } else {
        Direction::Bearish
    }
}

/// Reject a bare float tunable that is not a positive finite number
pub fn check_positive(detector: &str, name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AnalysisError::InvalidConfig(format!(
            "{detector} {name} must be a positive finite number, got {value}"
        )))
    }
}

/// Trend of a window: relative change from its first to its last close
#[inline]
pub fn window_trend(candles: &[Candle]) -> f64 {
    match (candles.first(), candles.last()) {
        (Some(first), Some(last)) => relative_change(first.close, last.close),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_last() {
        assert_eq!(keep_last(vec![1, 2, 3, 4], 2), vec![3, 4]);
        assert_eq!(keep_last(vec![1], 5), vec![1]);
    }

    #[test]
    fn test_capped_bias_counts_each_side() {
        assert_eq!(capped_bias(3, 3, 3), Direction::Bearish);
        assert_eq!(capped_bias(7, 3, 3), Direction::Bearish);
        assert_eq!(capped_bias(2, 1, 3), Direction::Bullish);
        assert_eq!(capped_bias(0, 1, 3), Direction::Bearish);
        assert_eq!(capped_bias(1, 0, 3), Direction::Bullish);
        assert_eq!(capped_bias(0, 0, 3), Direction::Neutral);
    }

    #[test]
    fn test_check_positive() {
        assert!(check_positive("support_resistance", "proximity_pct", 0.5).is_ok());
        for bad in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                check_positive("support_resistance", "proximity_pct", bad),
                Err(AnalysisError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_relative_change_zero_base() {
        assert_eq!(relative_change(0.0, 5.0), 0.0);
        assert!((relative_change(100.0, 110.0) - 0.1).abs() < 1e-12);
    }
}
