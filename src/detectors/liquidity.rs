//! Liquidity detectors: high-volume compression pools, sweeps of prior
//! extremes and wick-dominated grabs.

use std::collections::HashMap;

use serde::Serialize;

use super::helpers::{check_positive, keep_last, max_high, min_low, KEEP_RECENT};
use crate::{
    indicators::mean,
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    series::Candle,
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, OHLCVExt, Period, Ratio, Result, Signal,
};

impl_with_defaults!(
    LiquidityZoneDetector,
    LiquiditySweepDetector,
    LiquidityGrabDetector,
);

// ============================================================
// LIQUIDITY ZONES
// ============================================================

/// A heavy-volume candle with a compressed range
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiquidityZone {
    pub index: usize,
    pub timestamp: i64,
    /// Midpoint of the candle
    pub price_level: f64,
    pub volume_ratio: f64,
    /// Candle range relative to the window average
    pub range_ratio: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone)]
pub struct LiquidityZoneDetector {
    /// Candles on each side forming the comparison window
    pub window: Period,
    pub volume_factor: f64,
    pub strong_volume_factor: f64,
    pub range_factor: Ratio,
}

impl Default for LiquidityZoneDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(5),
            volume_factor: 1.5,
            strong_volume_factor: 2.0,
            range_factor: Ratio::new_const(0.8),
        }
    }
}

impl LiquidityZoneDetector {
    pub fn zones(&self, candles: &[Candle]) -> Vec<LiquidityZone> {
        let w = self.window.get();
        let mut zones = Vec::new();

        for i in w..candles.len().saturating_sub(w) {
            let window = &candles[i - w..i + w];
            let volumes: Vec<f64> = window.iter().map(|c| c.volume).collect();
            let ranges: Vec<f64> = window.iter().map(|c| c.range()).collect();
            let (Some(avg_volume), Some(avg_range)) = (mean(&volumes), mean(&ranges)) else {
                continue;
            };
            if avg_volume <= 0.0 || avg_range <= 0.0 {
                continue;
            }

            let c = &candles[i];
            let volume_ratio = c.volume / avg_volume;
            let range_ratio = c.range() / avg_range;
            if volume_ratio > self.volume_factor && range_ratio < self.range_factor.get() {
                zones.push(LiquidityZone {
                    index: i,
                    timestamp: c.timestamp,
                    price_level: c.midpoint(),
                    volume_ratio,
                    range_ratio,
                    grade: if volume_ratio > self.strong_volume_factor {
                        Grade::High
                    } else {
                        Grade::Medium
                    },
                });
            }
        }
        zones
    }
}

impl Detector for LiquidityZoneDetector {
    fn id(&self) -> DetectorId {
        DetectorId::LIQUIDITY_ZONES
    }

    fn min_candles(&self) -> usize {
        10
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let zones = self.zones(ctx.candles());
        let count = zones.len();
        let Some(latest) = zones.last().copied() else {
            return Ok(Signal::none(self.id()).with_detail(Detail::LiquidityZones {
                zones,
                count,
            }));
        };

        Ok(Signal::new(self.id(), Direction::Neutral, latest.volume_ratio / 2.0)
            .with_label("LIQUIDITY_POOL")
            .with_grade(latest.grade)
            .with_detail(Detail::LiquidityZones {
                zones: keep_last(zones, KEEP_RECENT),
                count,
            }))
    }
    fn validate_config(&self) -> Result<()> {
        let id = self.id();
        check_positive(id.as_str(), "volume_factor", self.volume_factor)?;
        check_positive(id.as_str(), "strong_volume_factor", self.strong_volume_factor)
    }
}

// ============================================================
// WICK REVERSALS (SWEEPS AND GRABS)
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReversalKind {
    Sweep,
    Grab,
}

/// Price pierced a recent extreme and came back
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WickReversal {
    pub kind: ReversalKind,
    pub direction: Direction,
    pub index: usize,
    pub timestamp: i64,
    /// The pierced extreme
    pub level: f64,
    /// Wick end of the piercing candle
    pub extreme: f64,
    pub close: f64,
    pub grade: Grade,
    /// Share of the candle range on the rejection side
    pub wick_share: f64,
}

fn reversal_signal(
    id: DetectorId,
    events: Vec<WickReversal>,
    strength: impl Fn(&WickReversal) -> f64,
) -> Signal {
    let count = events.len();
    let Some(latest) = events.last().copied() else {
        return Signal::none(id).with_detail(Detail::Reversals { events, count });
    };
    let label = match (latest.kind, latest.direction) {
        (ReversalKind::Sweep, Direction::Bullish) => "BULLISH_SWEEP",
        (ReversalKind::Sweep, _) => "BEARISH_SWEEP",
        (ReversalKind::Grab, Direction::Bullish) => "BULLISH_GRAB",
        (ReversalKind::Grab, _) => "BEARISH_GRAB",
    };
    Signal::new(id, latest.direction, strength(&latest))
        .with_label(label)
        .with_grade(latest.grade)
        .with_detail(Detail::Reversals {
            events: keep_last(events, KEEP_RECENT),
            count,
        })
}

#[inline]
fn wick_share(part: f64, range: f64) -> f64 {
    if range > 0.0 {
        part / range
    } else {
        0.0
    }
}

// ============================================================
// LIQUIDITY SWEEP
// ============================================================

/// Candle runs the prior `lookback` extreme, closes back in its own direction
/// and the next candle holds above (below) the sweep wick.
#[derive(Debug, Clone)]
pub struct LiquiditySweepDetector {
    pub lookback: Period,
}

impl Default for LiquiditySweepDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(5),
        }
    }
}

impl LiquiditySweepDetector {
    pub fn sweeps(&self, candles: &[Candle]) -> Vec<WickReversal> {
        let lb = self.lookback.get();
        let mut events = Vec::new();

        for i in lb..candles.len().saturating_sub(2) {
            let c = &candles[i];
            let next = &candles[i + 1];
            let prior = &candles[i - lb..i];
            let prev_low = min_low(prior);
            let prev_high = max_high(prior);

            let event = |direction: Direction, level: f64, extreme: f64, grade: Grade| WickReversal {
                kind: ReversalKind::Sweep,
                direction,
                index: i,
                timestamp: c.timestamp,
                level,
                extreme,
                close: c.close,
                grade,
                wick_share: match direction {
                    Direction::Bullish => wick_share(c.close - c.low, c.range()),
                    _ => wick_share(c.high - c.close, c.range()),
                },
            };

            if c.low < prev_low && c.is_bullish() && next.low > c.low {
                let grade = if c.close > prev_low { Grade::High } else { Grade::Medium };
                events.push(event(Direction::Bullish, prev_low, c.low, grade));
            } else if c.high > prev_high && c.is_bearish() && next.high < c.high {
                let grade = if c.close < prev_high { Grade::High } else { Grade::Medium };
                events.push(event(Direction::Bearish, prev_high, c.high, grade));
            }
        }
        events
    }
}

impl Detector for LiquiditySweepDetector {
    fn id(&self) -> DetectorId {
        DetectorId::LIQUIDITY_SWEEP
    }

    fn min_candles(&self) -> usize {
        10
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let events = self.sweeps(ctx.candles());
        Ok(reversal_signal(self.id(), events, |e| e.grade.strength()))
    }
}

// ============================================================
// LIQUIDITY GRAB
// ============================================================

/// Candle breaks the prior `lookback` extreme but closes back inside with the
/// rejection wick covering more than `wick_ratio` of its range.
#[derive(Debug, Clone)]
pub struct LiquidityGrabDetector {
    pub lookback: Period,
    pub wick_ratio: Ratio,
}

impl Default for LiquidityGrabDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(3),
            wick_ratio: Ratio::new_const(0.6),
        }
    }
}

impl LiquidityGrabDetector {
    pub fn grabs(&self, candles: &[Candle]) -> Vec<WickReversal> {
        let lb = self.lookback.get();
        let min_wick = self.wick_ratio.get();
        let mut events = Vec::new();

        for i in lb..candles.len().saturating_sub(3) {
            let c = &candles[i];
            let prior = &candles[i - lb..i];
            let support = min_low(prior);
            let resistance = max_high(prior);
            let range = c.range();

            let lower = wick_share(c.close - c.low, range);
            let upper = wick_share(c.high - c.close, range);
            let (direction, level, extreme, share) =
                if c.low < support && c.close > support && lower > min_wick {
                    (Direction::Bullish, support, c.low, lower)
                } else if c.high > resistance && c.close < resistance && upper > min_wick {
                    (Direction::Bearish, resistance, c.high, upper)
                } else {
                    continue;
                };

            events.push(WickReversal {
                kind: ReversalKind::Grab,
                direction,
                index: i,
                timestamp: c.timestamp,
                level,
                extreme,
                close: c.close,
                grade: Grade::High,
                wick_share: share,
            });
        }
        events
    }
}

impl Detector for LiquidityGrabDetector {
    fn id(&self) -> DetectorId {
        DetectorId::LIQUIDITY_GRAB
    }

    fn min_candles(&self) -> usize {
        8
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let events = self.grabs(ctx.candles());
        Ok(reversal_signal(self.id(), events, |e| e.wick_share))
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static LIQUIDITY_ZONE_PARAMS: &[ParamMeta] = &[
    ParamMeta::factor(
        "volume_factor",
        1.5,
        (1.2, 3.0, 0.1),
        "Volume multiple of the window average",
    ),
    ParamMeta::ratio(
        "range_factor",
        0.8,
        (0.5, 1.0, 0.1),
        "Maximum range relative to the window average",
    ),
];

static SWEEP_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "lookback",
    5.0,
    (3.0, 10.0, 1.0),
    "Prior candles whose extreme must be swept",
)];

static GRAB_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 3.0, (2.0, 6.0, 1.0), "Prior candles forming the level"),
    ParamMeta::ratio(
        "wick_ratio",
        0.6,
        (0.5, 0.8, 0.05),
        "Minimum rejection-wick share of the range",
    ),
];

impl ParameterizedDetector for LiquidityZoneDetector {
    fn param_meta() -> &'static [ParamMeta] {
        LIQUIDITY_ZONE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            volume_factor: get_factor(params, "volume_factor", 1.5)?,
            range_factor: get_ratio(params, "range_factor", 0.8)?,
            ..Self::default()
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::LIQUIDITY_ZONES.as_str()
    }
}

impl ParameterizedDetector for LiquiditySweepDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SWEEP_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 5)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::LIQUIDITY_SWEEP.as_str()
    }
}

impl ParameterizedDetector for LiquidityGrabDetector {
    fn param_meta() -> &'static [ParamMeta] {
        GRAB_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 3)?,
            wick_ratio: get_ratio(params, "wick_ratio", 0.6)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::LIQUIDITY_GRAB.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::CandleSeries;

    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64, 100.0, 101.0, 99.0, 100.0))
            .collect()
    }

    #[test]
    fn test_liquidity_pool_on_heavy_quiet_candle() {
        let mut candles = flat(20);
        candles[10] = Candle::new(10, 100.0, 100.2, 99.8, 100.1).with_volume(5000.0);
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sig = LiquidityZoneDetector::default().detect(&ctx).unwrap();
        assert!(sig.detected);
        assert_eq!(sig.direction, Direction::Neutral);
        assert_eq!(sig.grade, Some(Grade::High));
        assert_eq!(sig.detail.count(), 1);
    }

    #[test]
    fn test_bullish_sweep_and_grab() {
        let mut candles = flat(20);
        candles[12] = Candle::new(12, 99.5, 101.0, 96.0, 100.5);
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);

        let sweep = LiquiditySweepDetector::default().detect(&ctx).unwrap();
        assert_eq!(sweep.direction, Direction::Bullish);
        assert_eq!(sweep.grade, Some(Grade::High));
        assert_eq!(sweep.label, Some("BULLISH_SWEEP"));

        let grab = LiquidityGrabDetector::default().detect(&ctx).unwrap();
        assert_eq!(grab.direction, Direction::Bullish);
        assert!((grab.strength - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_quiet_market_has_no_sweeps() {
        let s = CandleSeries::new(flat(20)).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sweep = LiquiditySweepDetector::default().detect(&ctx).unwrap();
        assert!(!sweep.detected);
        assert_eq!(sweep.detail.count(), 0);
    }
}
