//! Candle storage and swing-point scanning
//!
//! A [`CandleSeries`] is validated once on construction (ascending, unique
//! timestamps and consistent OHLC values) and is read-only afterwards. Every
//! detector receives the same series by shared reference.

use serde::{Deserialize, Serialize};

use crate::{AnalysisError, OHLCVExt, Result, OHLCV};

/// Volume assigned to candles whose source carries no volume column
pub const DEFAULT_VOLUME: f64 = 1000.0;

/// Default swing-point neighbourhood (candles on each side)
pub const DEFAULT_SWING_WINDOW: usize = 5;

/// Number of most recent swing points kept per kind
pub const SWING_HISTORY: usize = 10;

// ============================================================
// CANDLE
// ============================================================

/// A single OHLCV period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    DEFAULT_VOLUME
}

impl Candle {
    /// Candle without volume information; volume is set to [`DEFAULT_VOLUME`].
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume: DEFAULT_VOLUME,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

impl OHLCV for Candle {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.timestamp)
    }
}

// ============================================================
// CANDLE SERIES
// ============================================================

/// Ordered, validated, immutable sequence of candles
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Validate and wrap candles.
    ///
    /// Rejects non-finite prices, inconsistent OHLC values and timestamps that
    /// are not strictly ascending.
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for (i, candle) in candles.iter().enumerate() {
            candle.validate().map_err(|e| match e {
                AnalysisError::InvalidCandle { reason, .. } => {
                    AnalysisError::InvalidCandle { index: i, reason }
                }
                other => other,
            })?;
        }
        for (i, pair) in candles.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(AnalysisError::InvalidCandle {
                    index: i + 1,
                    reason: "timestamps must be strictly ascending",
                });
            }
        }
        Ok(Self { candles })
    }

    /// Build from any OHLCV source. Bars without a timestamp get their position.
    pub fn from_bars<T: OHLCV>(bars: &[T]) -> Result<Self> {
        let candles = bars
            .iter()
            .enumerate()
            .map(|(i, b)| Candle {
                timestamp: b.timestamp().unwrap_or(i as i64),
                open: b.open(),
                high: b.high(),
                low: b.low(),
                close: b.close(),
                volume: b.volume(),
            })
            .collect();
        Self::new(candles)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    #[inline]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    #[inline]
    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Close of the latest candle
    #[inline]
    pub fn current_price(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }

    /// Close `back` candles before the latest one (`back = 0` is the latest).
    #[inline]
    pub fn close_back(&self, back: usize) -> Option<f64> {
        let len = self.candles.len();
        (back < len).then(|| self.candles[len - 1 - back].close)
    }

    /// The last `n` candles (or all of them when shorter)
    #[inline]
    pub fn tail(&self, n: usize) -> &[Candle] {
        &self.candles[self.candles.len().saturating_sub(n)..]
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume).collect()
    }

    /// Keep only the most recent `limit` candles.
    pub fn truncated(&self, limit: usize) -> Self {
        Self {
            candles: self.tail(limit).to_vec(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candle> {
        self.candles.iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a Candle;
    type IntoIter = std::slice::Iter<'a, Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.iter()
    }
}

// ============================================================
// SWING POINTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwingKind {
    High,
    Low,
}

/// Local extremum of the series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
    pub timestamp: i64,
}

/// Swing highs and lows, each in chronological order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Swings {
    pub highs: Vec<SwingPoint>,
    pub lows: Vec<SwingPoint>,
}

impl Swings {
    /// Prices of the last `n` highs, oldest first
    pub fn recent_high_prices(&self, n: usize) -> Vec<f64> {
        recent_prices(&self.highs, n)
    }

    /// Prices of the last `n` lows, oldest first
    pub fn recent_low_prices(&self, n: usize) -> Vec<f64> {
        recent_prices(&self.lows, n)
    }
}

fn recent_prices(points: &[SwingPoint], n: usize) -> Vec<f64> {
    points[points.len().saturating_sub(n)..]
        .iter()
        .map(|p| p.price)
        .collect()
}

fn swing_point(series: &CandleSeries, index: usize, kind: SwingKind) -> SwingPoint {
    let c = &series.candles[index];
    SwingPoint {
        index,
        price: match kind {
            SwingKind::High => c.high,
            SwingKind::Low => c.low,
        },
        kind,
        timestamp: c.timestamp,
    }
}

fn keep_recent(mut points: Vec<SwingPoint>) -> Vec<SwingPoint> {
    let excess = points.len().saturating_sub(SWING_HISTORY);
    points.drain(..excess);
    points
}

/// Strict swing points.
///
/// Index `i` (with `window <= i < len - window`) is a swing high when its high
/// is strictly greater than every high in the `window` candles on either side;
/// lows mirror this. Only the most recent [`SWING_HISTORY`] of each kind are
/// returned. Series shorter than `2 * window + 1` yield no points.
pub fn swing_points(series: &CandleSeries, window: usize) -> Swings {
    let len = series.len();
    if window == 0 || len < 2 * window + 1 {
        return Swings::default();
    }

    let candles = series.candles();
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    for i in window..len - window {
        let neighbours = (i - window..i).chain(i + 1..=i + window);
        let (mut is_high, mut is_low) = (true, true);
        for j in neighbours {
            is_high &= candles[i].high > candles[j].high;
            is_low &= candles[i].low < candles[j].low;
            if !is_high && !is_low {
                break;
            }
        }
        if is_high {
            highs.push(swing_point(series, i, SwingKind::High));
        }
        if is_low {
            lows.push(swing_point(series, i, SwingKind::Low));
        }
    }

    Swings {
        highs: keep_recent(highs),
        lows: keep_recent(lows),
    }
}

/// Block pivots: the confirmed part of the series (everything except the last
/// `window` candles) is cut into `window`-sized blocks aligned to its end, and
/// each block contributes its highest high and lowest low.
pub fn block_pivots(series: &CandleSeries, window: usize) -> Swings {
    let len = series.len();
    if window == 0 || len < 2 * window + 1 {
        return Swings::default();
    }

    let candles = series.candles();
    let confirmed = len - window;
    let mut highs = Vec::new();
    let mut lows = Vec::new();

    let mut end = confirmed;
    while end >= window {
        let start = end - window;
        let mut hi = start;
        let mut lo = start;
        for i in start..end {
            if candles[i].high > candles[hi].high {
                hi = i;
            }
            if candles[i].low < candles[lo].low {
                lo = i;
            }
        }
        highs.push(swing_point(series, hi, SwingKind::High));
        lows.push(swing_point(series, lo, SwingKind::Low));
        end = start;
    }

    highs.reverse();
    lows.reverse();
    Swings {
        highs: keep_recent(highs),
        lows: keep_recent(lows),
    }
}

/// Structure points used by the structure-reading detectors.
///
/// Strict swing points per kind when at least two exist, otherwise the block
/// pivots of that kind. A clean monotonic trend has no strict swing lows (or
/// highs) but still exposes a staircase of block pivots.
pub fn structure_points(series: &CandleSeries, window: usize) -> Swings {
    let strict = swing_points(series, window);
    if strict.highs.len() >= 2 && strict.lows.len() >= 2 {
        return strict;
    }
    let blocks = block_pivots(series, window);
    Swings {
        highs: if strict.highs.len() >= 2 {
            strict.highs
        } else {
            blocks.highs
        },
        lows: if strict.lows.len() >= 2 {
            strict.lows
        } else {
            blocks.lows
        },
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn series_from_closes(closes: &[f64]) -> CandleSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64 * 60, c, c + 0.5, c - 0.5, c))
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    fn zigzag(n: usize) -> CandleSeries {
        // Period-12 triangle wave: peaks at 6, 18, 30..., troughs at 0, 12, 24...
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                let phase = (i % 12) as f64;
                100.0 + if phase <= 6.0 { phase } else { 12.0 - phase }
            })
            .collect();
        series_from_closes(&closes)
    }

    #[test]
    fn test_default_volume() {
        let c = Candle::new(0, 1.0, 2.0, 0.5, 1.5);
        assert_eq!(c.volume, DEFAULT_VOLUME);
        assert_eq!(c.with_volume(5.0).volume, 5.0);
    }

    #[test]
    fn test_rejects_unordered_timestamps() {
        let candles = vec![
            Candle::new(10, 1.0, 2.0, 0.5, 1.5),
            Candle::new(10, 1.0, 2.0, 0.5, 1.5),
        ];
        let err = CandleSeries::new(candles).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidCandle { index: 1, .. }));
    }

    #[test]
    fn test_rejects_inconsistent_ohlc() {
        let candles = vec![
            Candle::new(0, 1.0, 2.0, 0.5, 1.5),
            Candle::new(1, 1.0, 1.2, 0.5, 1.5), // close above high
        ];
        let err = CandleSeries::new(candles).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidCandle { index: 1, .. }));
    }

    #[test]
    fn test_close_back_and_tail() {
        let s = series_from_closes(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.close_back(0), Some(4.0));
        assert_eq!(s.close_back(3), Some(1.0));
        assert_eq!(s.close_back(4), None);
        assert_eq!(s.tail(2).len(), 2);
        assert_eq!(s.truncated(3).len(), 3);
        assert_eq!(s.truncated(10).len(), 4);
    }

    #[test]
    fn test_swing_points_short_series_is_empty() {
        let s = series_from_closes(&[1.0; 10]);
        let swings = swing_points(&s, 5);
        assert!(swings.highs.is_empty());
        assert!(swings.lows.is_empty());
    }

    #[test]
    fn test_swing_points_zigzag() {
        let s = zigzag(60);
        let swings = swing_points(&s, 5);
        let high_idx: Vec<usize> = swings.highs.iter().map(|p| p.index).collect();
        let low_idx: Vec<usize> = swings.lows.iter().map(|p| p.index).collect();
        assert_eq!(high_idx, vec![6, 18, 30, 42, 54]);
        assert_eq!(low_idx, vec![12, 24, 36, 48]);
        assert!(swings.highs.iter().all(|p| p.kind == SwingKind::High));
    }

    #[test]
    fn test_swing_points_keep_last_ten() {
        let s = zigzag(200);
        let swings = swing_points(&s, 5);
        assert_eq!(swings.highs.len(), SWING_HISTORY);
        assert_eq!(swings.highs.last().unwrap().index, 186);
    }

    #[test]
    fn test_swing_points_equal_highs_are_not_strict() {
        let s = series_from_closes(&[1.0; 30]);
        let swings = swing_points(&s, 5);
        assert!(swings.highs.is_empty());
        assert!(swings.lows.is_empty());
    }

    #[test]
    fn test_structure_points_monotonic_fallback() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let s = series_from_closes(&closes);
        assert!(swing_points(&s, 5).lows.is_empty());

        let pts = structure_points(&s, 5);
        assert_eq!(pts.highs.len(), 7);
        assert_eq!(pts.lows.len(), 7);
        assert_eq!(pts.highs.last().unwrap().index, 34);
        assert_eq!(pts.lows.last().unwrap().index, 30);
        assert!(pts.lows.windows(2).all(|w| w[1].price > w[0].price));
    }

    #[test]
    fn test_structure_points_prefers_strict() {
        let s = zigzag(60);
        assert_eq!(structure_points(&s, 5), swing_points(&s, 5));
    }
}
