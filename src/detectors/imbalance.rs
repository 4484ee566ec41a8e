//! Fair value gaps: three-candle imbalances, and their inversions.

use serde::Serialize;

use super::helpers::{capped_bias, keep_last, BIAS_WINDOW, KEEP_RECENT};
use crate::{
    series::Candle,
    signal::Detail,
    AnalysisContext, Detector, DetectorId, Direction, OHLCVExt, Result, Signal,
};

impl_with_defaults!(FairValueGapDetector, InverseFairValueGapDetector);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapKind {
    BullishFvg,
    BearishFvg,
}

/// Price range left untraded between candles `start_index` and `start_index + 2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FairValueGap {
    #[serde(rename = "type")]
    pub kind: GapKind,
    pub start_index: usize,
    pub end_index: usize,
    pub timestamp: i64,
    pub gap_high: f64,
    pub gap_low: f64,
    /// A later candle traded back into the gap
    pub filled: bool,
}

impl FairValueGap {
    pub fn direction(&self) -> Direction {
        match self.kind {
            GapKind::BullishFvg => Direction::Bullish,
            GapKind::BearishFvg => Direction::Bearish,
        }
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.gap_high - self.gap_low
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        (self.gap_high + self.gap_low) / 2.0
    }

    #[inline]
    fn overlaps(&self, c: &Candle) -> bool {
        c.low < self.gap_high && c.high > self.gap_low
    }
}

/// Every fair value gap in the slice, chronological.
///
/// Bullish when `candles[i-2].high < candles[i].low` with a bullish middle
/// candle; bearish when `candles[i-2].low > candles[i].high` with a bearish
/// middle candle. Works on any slice of three or more candles.
pub fn find_fair_value_gaps(candles: &[Candle]) -> Vec<FairValueGap> {
    let mut gaps = Vec::new();
    for i in 2..candles.len() {
        let (first, middle, third) = (&candles[i - 2], &candles[i - 1], &candles[i]);

        let gap = if first.high < third.low && middle.is_bullish() {
            Some((GapKind::BullishFvg, third.low, first.high))
        } else if first.low > third.high && middle.is_bearish() {
            Some((GapKind::BearishFvg, first.low, third.high))
        } else {
            None
        };

        if let Some((kind, gap_high, gap_low)) = gap {
            let mut fvg = FairValueGap {
                kind,
                start_index: i - 2,
                end_index: i,
                timestamp: third.timestamp,
                gap_high,
                gap_low,
                filled: false,
            };
            fvg.filled = candles[i + 1..].iter().any(|c| fvg.overlaps(c));
            gaps.push(fvg);
        }
    }
    gaps
}

/// Split gaps into (bullish, bearish), optionally swapping the roles
fn split(gaps: Vec<FairValueGap>, inverse: bool) -> (Vec<FairValueGap>, Vec<FairValueGap>) {
    let (bullish, bearish): (Vec<_>, Vec<_>) =
        gaps.into_iter().partition(|g| g.kind == GapKind::BullishFvg);
    if inverse {
        (bearish, bullish)
    } else {
        (bullish, bearish)
    }
}

fn gap_signal(id: DetectorId, price: f64, candles: &[Candle], inverse: bool) -> Signal {
    let gaps = find_fair_value_gaps(candles);
    let count = gaps.len();

    let bullish_count = gaps.iter().filter(|g| g.kind == GapKind::BullishFvg).count();
    let mut bias = capped_bias(bullish_count, count - bullish_count, BIAS_WINDOW);
    if inverse {
        bias = bias.inverse();
    }

    // Nearest unfilled gap to the current price
    let active = gaps
        .iter()
        .filter(|g| !g.filled)
        .min_by(|a, b| {
            (a.midpoint() - price)
                .abs()
                .total_cmp(&(b.midpoint() - price).abs())
        })
        .copied();

    let (bullish, bearish) = split(gaps, inverse);
    let detail = Detail::Gaps {
        bullish: keep_last(bullish, KEEP_RECENT),
        bearish: keep_last(bearish, KEEP_RECENT),
        count,
        active,
    };

    let strength = if bias.is_neutral() { 0.0 } else { 1.0 };
    Signal::new(id, bias, strength)
        .with_label(bias.label())
        .with_detail(detail)
        .detected(count > 0)
}

// ============================================================
// FAIR VALUE GAP
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct FairValueGapDetector;

impl Detector for FairValueGapDetector {
    fn id(&self) -> DetectorId {
        DetectorId::FAIR_VALUE_GAP
    }

    fn min_candles(&self) -> usize {
        5
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        Ok(gap_signal(self.id(), ctx.price(), ctx.candles(), false))
    }
}

// ============================================================
// INVERSE FAIR VALUE GAP
// ============================================================

/// Bearish gaps read as bullish and vice versa
#[derive(Debug, Clone, Default)]
pub struct InverseFairValueGapDetector;

impl Detector for InverseFairValueGapDetector {
    fn id(&self) -> DetectorId {
        DetectorId::INVERSE_FAIR_VALUE_GAP
    }

    fn min_candles(&self) -> usize {
        5
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        Ok(gap_signal(self.id(), ctx.price(), ctx.candles(), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::CandleSeries;

    fn gap_up() -> Vec<Candle> {
        vec![
            Candle::new(0, 98.0, 100.0, 97.0, 99.0),
            Candle::new(1, 99.0, 106.0, 98.5, 105.5),
            Candle::new(2, 105.5, 108.0, 105.0, 107.0),
        ]
    }

    #[test]
    fn test_three_candle_bullish_gap() {
        let gaps = find_fair_value_gaps(&gap_up());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].kind, GapKind::BullishFvg);
        assert_eq!(gaps[0].gap_low, 100.0);
        assert_eq!(gaps[0].gap_high, 105.0);
        assert!(!gaps[0].filled);
    }

    #[test]
    fn test_gap_filled_by_later_candle() {
        let mut candles = gap_up();
        candles.push(Candle::new(3, 107.0, 107.5, 103.0, 104.0));
        let gaps = find_fair_value_gaps(&candles);
        assert!(gaps[0].filled);
    }

    #[test]
    fn test_inverse_swaps_roles() {
        let mut candles = gap_up();
        candles.push(Candle::new(3, 107.0, 108.5, 105.8, 108.0));
        candles.push(Candle::new(4, 108.0, 109.0, 107.5, 108.5));
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);

        let fvg = FairValueGapDetector.detect(&ctx).unwrap();
        let ifvg = InverseFairValueGapDetector.detect(&ctx).unwrap();
        assert_eq!(fvg.direction, Direction::Bullish);
        assert_eq!(ifvg.direction, Direction::Bearish);
        match ifvg.detail {
            Detail::Gaps { bullish, bearish, .. } => {
                assert!(bullish.is_empty());
                assert_eq!(bearish.len(), 1);
            },
            other => panic!("unexpected detail {other:?}"),
        }
    }

    /// Three bearish gaps on the way down, then three bullish gaps back up
    fn down_then_up() -> Vec<Candle> {
        [
            (200.0, 201.0, 199.0, 199.5),
            (199.5, 199.6, 190.0, 190.5),
            (190.5, 191.0, 189.0, 190.0),
            (190.0, 190.2, 180.0, 180.5),
            (180.5, 181.0, 179.0, 180.0),
            (180.0, 180.2, 170.0, 170.5),
            (170.5, 171.0, 169.0, 170.0),
            (170.0, 180.0, 169.8, 179.5),
            (179.5, 181.0, 179.0, 180.5),
            (180.5, 190.0, 179.9, 189.5),
            (189.5, 191.0, 189.0, 190.5),
            (190.5, 200.0, 189.9, 199.5),
            (199.5, 201.0, 199.0, 200.5),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle::new(i as i64, o, h, l, c))
        .collect()
    }

    #[test]
    fn test_equal_capped_counts_lean_bearish() {
        let candles = down_then_up();
        let gaps = find_fair_value_gaps(&candles);
        let kinds: Vec<_> = gaps.iter().map(|g| g.kind).collect();
        assert_eq!(
            kinds,
            vec![
                GapKind::BearishFvg,
                GapKind::BearishFvg,
                GapKind::BearishFvg,
                GapKind::BullishFvg,
                GapKind::BullishFvg,
                GapKind::BullishFvg,
            ]
        );

        let fvg = gap_signal(DetectorId::FAIR_VALUE_GAP, 200.5, &candles, false);
        assert_eq!(fvg.direction, Direction::Bearish);
        assert_eq!(fvg.label, Some("BEARISH"));

        let ifvg = gap_signal(DetectorId::INVERSE_FAIR_VALUE_GAP, 200.5, &candles, true);
        assert_eq!(ifvg.direction, Direction::Bullish);
    }

    #[test]
    fn test_no_gaps_is_neutral() {
        let flat: Vec<Candle> = (0..6).map(|i| Candle::new(i, 1.0, 1.1, 0.9, 1.0)).collect();
        let signal = gap_signal(DetectorId::FAIR_VALUE_GAP, 1.0, &flat, true);
        assert_eq!(signal.direction, Direction::Neutral);
        assert_eq!(signal.strength, 0.0);
    }
}
