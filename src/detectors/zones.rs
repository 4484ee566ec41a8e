//! Zone detectors: order blocks, support/resistance levels and supply/demand
//! zones.

use std::collections::HashMap;

use serde::Serialize;

use super::helpers::{
    capped_bias, check_positive, keep_last, max_high, min_low, BIAS_WINDOW, IMPULSE_MOVE, KEEP_RECENT,
    LEVEL_TOLERANCE,
};
use crate::{
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    series::Candle,
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, OHLCVExt, Period, Ratio, Result, Signal,
};

impl_with_defaults!(
    OrderBlockDetector,
    SupportResistanceDetector,
    SupplyDemandDetector,
);

// ============================================================
// ORDER BLOCKS
// ============================================================

/// A strong-bodied candle followed by a move beyond its extreme
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderBlock {
    pub index: usize,
    pub timestamp: i64,
    pub direction: Direction,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
    /// Body-to-range ratio of the block candle
    pub strength: f64,
}

impl OrderBlock {
    fn from_candle(index: usize, c: &Candle, direction: Direction, strength: f64) -> Self {
        Self {
            index,
            timestamp: c.timestamp,
            direction,
            high: c.high,
            low: c.low,
            open: c.open,
            close: c.close,
            strength,
        }
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

#[derive(Debug, Clone)]
pub struct OrderBlockDetector {
    /// Minimum body-to-range ratio of the block candle
    pub min_body_ratio: Ratio,
    /// Fraction the follow-through must exceed the block extreme by
    pub extension: Ratio,
    /// Candles after the block searched for follow-through
    pub lookahead: Period,
    /// Candles skipped at the start of the series
    pub lookback: Period,
}

impl Default for OrderBlockDetector {
    fn default() -> Self {
        Self {
            min_body_ratio: Ratio::new_const(0.7),
            extension: Ratio::new_const(0.002),
            lookahead: Period::new_const(5),
            lookback: Period::new_const(5),
        }
    }
}

impl OrderBlockDetector {
    /// All order blocks, bullish and bearish, in chronological order
    pub fn scan(&self, candles: &[Candle]) -> (Vec<OrderBlock>, Vec<OrderBlock>) {
        let ahead = self.lookahead.get();
        let ext = self.extension.get();
        let mut bullish = Vec::new();
        let mut bearish = Vec::new();

        for i in self.lookback.get()..candles.len().saturating_sub(ahead) {
            let c = &candles[i];
            let Some(ratio) = c.body_ratio() else {
                continue;
            };
            if ratio < self.min_body_ratio.get() {
                continue;
            }
            let next = &candles[i + 1..=i + ahead];
            if c.is_bullish() && max_high(next) > c.high * (1.0 + ext) {
                bullish.push(OrderBlock::from_candle(i, c, Direction::Bullish, ratio));
            } else if c.is_bearish() && min_low(next) < c.low * (1.0 - ext) {
                bearish.push(OrderBlock::from_candle(i, c, Direction::Bearish, ratio));
            }
        }
        (bullish, bearish)
    }
}

impl Detector for OrderBlockDetector {
    fn id(&self) -> DetectorId {
        DetectorId::ORDER_BLOCKS
    }

    fn min_candles(&self) -> usize {
        10
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let (bullish, bearish) = self.scan(ctx.candles());
        let count = bullish.len() + bearish.len();

        let bias = capped_bias(bullish.len(), bearish.len(), BIAS_WINDOW);
        let strength = match bias {
            Direction::Bullish => bullish.last().map_or(0.0, |b| b.strength),
            Direction::Bearish => bearish.last().map_or(0.0, |b| b.strength),
            Direction::Neutral => 0.0,
        };

        let detail = Detail::OrderBlocks {
            bullish: keep_last(bullish, KEEP_RECENT),
            bearish: keep_last(bearish, KEEP_RECENT),
            count,
        };
        Ok(Signal::new(self.id(), bias, strength)
            .with_label(bias.label())
            .with_detail(detail)
            .detected(count > 0))
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_body_ratio.get() <= 0.0 {
            return Err(crate::AnalysisError::InvalidConfig(
                "order block min_body_ratio must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// SUPPORT / RESISTANCE
// ============================================================

/// A pivot price retested at least twice nearby
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceLevel {
    pub price: f64,
    pub index: usize,
    /// Candles touching the level within the test span (the pivot included)
    pub tests: usize,
    pub grade: Grade,
}

#[derive(Debug, Clone)]
pub struct SupportResistanceDetector {
    pub pivot_window: Period,
    /// Candles on each side of a pivot scanned for retests
    pub test_span: Period,
    pub tolerance: Ratio,
    /// Distance (percent of price) that counts as near a level
    pub proximity_pct: f64,
}

impl Default for SupportResistanceDetector {
    fn default() -> Self {
        Self {
            pivot_window: Period::new_const(5),
            test_span: Period::new_const(20),
            tolerance: Ratio::new_const(LEVEL_TOLERANCE),
            proximity_pct: 0.5,
        }
    }
}

impl SupportResistanceDetector {
    /// Supports and resistances, chronological
    pub fn levels(&self, candles: &[Candle]) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let len = candles.len();
        let w = self.pivot_window.get();
        let span = self.test_span.get();
        let tol = self.tolerance.get();
        let mut supports = Vec::new();
        let mut resistances = Vec::new();
        if len < 2 * w + 1 {
            return (supports, resistances);
        }

        let retests = |level: f64, i: usize, lows: bool| {
            candles[i.saturating_sub(span)..(i + span).min(len)]
                .iter()
                .map(|c| if lows { c.low } else { c.high })
                .filter(|p| (p - level).abs() < level * tol)
                .count()
        };
        let level = |price: f64, index: usize, tests: usize| PriceLevel {
            price,
            index,
            tests,
            grade: if tests >= 3 { Grade::High } else { Grade::Medium },
        };

        for i in w..len.saturating_sub(w) {
            let window = &candles[i - w..=i + w];
            let c = &candles[i];
            if c.low == min_low(window) {
                let tests = retests(c.low, i, true);
                if tests >= 2 {
                    supports.push(level(c.low, i, tests));
                }
            }
            if c.high == max_high(window) {
                let tests = retests(c.high, i, false);
                if tests >= 2 {
                    resistances.push(level(c.high, i, tests));
                }
            }
        }
        (supports, resistances)
    }
}

impl Detector for SupportResistanceDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SUPPORT_RESISTANCE
    }

    fn min_candles(&self) -> usize {
        20
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let price = ctx.price();
        let (supports, resistances) = self.levels(ctx.candles());

        let nearest_support = supports
            .iter()
            .filter(|l| l.price < price)
            .max_by(|a, b| a.price.total_cmp(&b.price))
            .copied();
        let nearest_resistance = resistances
            .iter()
            .filter(|l| l.price > price)
            .min_by(|a, b| a.price.total_cmp(&b.price))
            .copied();

        let support_distance_pct =
            nearest_support.map_or(f64::INFINITY, |l| (price - l.price) / price * 100.0);
        let resistance_distance_pct =
            nearest_resistance.map_or(f64::INFINITY, |l| (l.price - price) / price * 100.0);
        let proximity = (1.0 / (support_distance_pct.min(resistance_distance_pct) + 0.1)).min(1.0);

        let detail = Detail::Levels {
            supports: keep_last(supports, KEEP_RECENT),
            resistances: keep_last(resistances, KEEP_RECENT),
            nearest_support: nearest_support.map(|l| l.price),
            nearest_resistance: nearest_resistance.map(|l| l.price),
            support_distance_pct,
            resistance_distance_pct,
        };

        let fired = match (nearest_support, nearest_resistance) {
            (Some(l), _) if support_distance_pct < self.proximity_pct => {
                Some((Direction::Bullish, "NEAR_SUPPORT", l.grade))
            },
            (_, Some(l)) if resistance_distance_pct < self.proximity_pct => {
                Some((Direction::Bearish, "NEAR_RESISTANCE", l.grade))
            },
            _ => None,
        };

        Ok(match fired {
            Some((direction, label, grade)) => Signal::new(self.id(), direction, proximity)
                .with_label(label)
                .with_grade(grade)
                .with_detail(detail),
            None => Signal::none(self.id()).with_detail(detail),
        })
    }

    fn validate_config(&self) -> Result<()> {
        check_positive(self.id().as_str(), "proximity_pct", self.proximity_pct)
    }
}

// ============================================================
// SUPPLY / DEMAND
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneKind {
    Supply,
    Demand,
}

/// Price envelope of the three candles ending in an impulse candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SupplyDemandZone {
    pub kind: ZoneKind,
    pub index: usize,
    pub upper: f64,
    pub lower: f64,
    /// Relative size of the impulse candle body
    pub strength: f64,
}

impl SupplyDemandZone {
    #[inline]
    pub fn contains(&self, price: f64) -> bool {
        self.lower <= price && price <= self.upper
    }

    pub fn direction(&self) -> Direction {
        match self.kind {
            ZoneKind::Demand => Direction::Bullish,
            ZoneKind::Supply => Direction::Bearish,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupplyDemandDetector {
    /// Minimum open-to-close move of the impulse candle
    pub min_move: Ratio,
    /// Most recent zones checked for containing the current price
    pub active_window: Period,
}

impl Default for SupplyDemandDetector {
    fn default() -> Self {
        Self {
            min_move: Ratio::new_const(IMPULSE_MOVE),
            active_window: Period::new_const(10),
        }
    }
}

impl SupplyDemandDetector {
    pub fn zones(&self, candles: &[Candle]) -> Vec<SupplyDemandZone> {
        let min_move = self.min_move.get();
        let mut zones = Vec::new();

        for i in 10..candles.len().saturating_sub(5) {
            let c = &candles[i];
            if c.open == 0.0 {
                continue;
            }
            let up = (c.close - c.open) / c.open;
            let kind = if up >= min_move {
                ZoneKind::Demand
            } else if -up >= min_move {
                ZoneKind::Supply
            } else {
                continue;
            };
            let envelope = &candles[i - 2..=i];
            zones.push(SupplyDemandZone {
                kind,
                index: i,
                upper: max_high(envelope),
                lower: min_low(envelope),
                strength: up.abs(),
            });
        }
        zones
    }
}

impl Detector for SupplyDemandDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SUPPLY_DEMAND
    }

    fn min_candles(&self) -> usize {
        16
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let price = ctx.price();
        let zones = self.zones(ctx.candles());
        let count = zones.len();

        let recent = &zones[count.saturating_sub(self.active_window.get())..];
        let active: Vec<SupplyDemandZone> =
            recent.iter().filter(|z| z.contains(price)).copied().collect();
        let strongest = active
            .iter()
            .max_by(|a, b| a.strength.total_cmp(&b.strength))
            .copied();

        let detail = Detail::Zones {
            zones: keep_last(zones, KEEP_RECENT),
            active,
            count,
        };
        Ok(match strongest {
            Some(zone) => Signal::new(self.id(), zone.direction(), 1.0)
                .with_label(match zone.kind {
                    ZoneKind::Demand => "IN_DEMAND_ZONE",
                    ZoneKind::Supply => "IN_SUPPLY_ZONE",
                })
                .with_detail(detail),
            None => Signal::none(self.id()).with_detail(detail),
        })
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static ORDER_BLOCK_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("min_body_ratio", 0.7, (0.5, 0.9, 0.1), "Minimum body-to-range ratio"),
    ParamMeta::ratio("extension", 0.002, (0.001, 0.005, 0.001), "Follow-through beyond the block"),
    ParamMeta::period("lookahead", 5.0, (3.0, 10.0, 1.0), "Candles searched for follow-through"),
];

static SUPPORT_RESISTANCE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("pivot_window", 5.0, (3.0, 10.0, 1.0), "Pivot neighbourhood"),
    ParamMeta::ratio("tolerance", 0.002, (0.001, 0.005, 0.001), "Retest tolerance"),
    ParamMeta::factor("proximity_pct", 0.5, (0.1, 1.0, 0.1), "Near-level distance in percent"),
];

static SUPPLY_DEMAND_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "min_move",
    0.01,
    (0.005, 0.03, 0.005),
    "Minimum impulse candle move",
)];

impl ParameterizedDetector for OrderBlockDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ORDER_BLOCK_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_body_ratio: get_ratio(params, "min_body_ratio", 0.7)?,
            extension: get_ratio(params, "extension", 0.002)?,
            lookahead: get_period(params, "lookahead", 5)?,
            ..Self::default()
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::ORDER_BLOCKS.as_str()
    }
}

impl ParameterizedDetector for SupportResistanceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SUPPORT_RESISTANCE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            pivot_window: get_period(params, "pivot_window", 5)?,
            tolerance: get_ratio(params, "tolerance", LEVEL_TOLERANCE)?,
            proximity_pct: get_factor(params, "proximity_pct", 0.5)?,
            ..Self::default()
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::SUPPORT_RESISTANCE.as_str()
    }
}

impl ParameterizedDetector for SupplyDemandDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SUPPLY_DEMAND_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_move: get_ratio(params, "min_move", IMPULSE_MOVE)?,
            ..Self::default()
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::SUPPLY_DEMAND.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::CandleSeries;

    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64, 100.0, 100.5, 99.5, 100.0))
            .collect()
    }

    #[test]
    fn test_bullish_order_block() {
        let mut candles = flat(20);
        // Strong bullish candle at 8, followed by a push above its high
        candles[8] = Candle::new(8, 100.0, 102.1, 99.9, 102.0);
        candles[10] = Candle::new(10, 102.0, 103.0, 101.9, 102.8);
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sig = OrderBlockDetector::default().detect(&ctx).unwrap();
        assert!(sig.detected);
        assert_eq!(sig.direction, Direction::Bullish);
        match sig.detail {
            Detail::OrderBlocks { bullish, count, .. } => {
                assert_eq!(count, 1);
                assert_eq!(bullish[0].index, 8);
            },
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn test_flat_series_has_retested_levels() {
        let s = CandleSeries::new(flat(30)).unwrap();
        let (supports, resistances) = SupportResistanceDetector::default().levels(s.candles());
        assert!(!supports.is_empty());
        assert!(!resistances.is_empty());
        assert!(supports.iter().all(|l| l.grade == Grade::High));
    }

    #[test]
    fn test_price_inside_demand_zone() {
        let mut candles = flat(20);
        candles[12] = Candle::new(12, 100.0, 101.6, 99.8, 101.5);
        for (i, c) in candles.iter_mut().enumerate().skip(13) {
            *c = Candle::new(i as i64, 101.0, 101.3, 100.7, 101.0);
        }
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sig = SupplyDemandDetector::default().detect(&ctx).unwrap();
        assert_eq!(sig.direction, Direction::Bullish);
        assert_eq!(sig.label, Some("IN_DEMAND_ZONE"));
        assert_eq!(sig.detail.count(), 1);
    }
}
