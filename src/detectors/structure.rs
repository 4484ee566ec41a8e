//! Structure-reading detectors
//!
//! Market structure shift, break of structure, SMC structure break and the ICT
//! liquidity-grab reversal. All of them read the context's structure points.

use std::collections::HashMap;

use super::helpers::{BREAK_BUFFER, STRUCTURE_LOOKBACK};
use crate::{
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    series::DEFAULT_SWING_WINDOW,
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, Period, Ratio, Result, Signal,
};

impl_with_defaults!(
    MarketStructureShiftDetector,
    BreakOfStructureDetector,
    SmcStructureDetector,
    IctReversalDetector,
);

const MIN_STRUCTURE_CANDLES: usize = 2 * DEFAULT_SWING_WINDOW + 1;

fn structure_detail(ctx: &AnalysisContext<'_>, n: usize, level: Option<f64>) -> Detail {
    Detail::Structure {
        recent_highs: ctx.structure.recent_high_prices(n),
        recent_lows: ctx.structure.recent_low_prices(n),
        level,
    }
}

// ============================================================
// MARKET STRUCTURE SHIFT
// ============================================================

/// A higher low after a lower one (bullish) or a lower high after a higher one
/// (bearish) among the most recent structure points.
#[derive(Debug, Clone)]
pub struct MarketStructureShiftDetector {
    pub lookback: Period,
}

impl Default for MarketStructureShiftDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(STRUCTURE_LOOKBACK),
        }
    }
}

impl Detector for MarketStructureShiftDetector {
    fn id(&self) -> DetectorId {
        DetectorId::MARKET_STRUCTURE_SHIFT
    }

    fn min_candles(&self) -> usize {
        20
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let n = self.lookback.get();
        let highs = ctx.structure.recent_high_prices(n);
        let lows = ctx.structure.recent_low_prices(n);
        let detail = structure_detail(ctx, n, None);

        let last_two = |v: &[f64]| (v.len() >= 2).then(|| (v[v.len() - 2], v[v.len() - 1]));

        // Bullish takes precedence when both appear
        if let Some((prev, last)) = last_two(&lows[..]).filter(|(p, l)| l > p) {
            let strength = ((last - prev) / prev * 100.0).min(1.0);
            return Ok(Signal::new(self.id(), Direction::Bullish, strength)
                .with_label("BULLISH")
                .with_grade(Grade::High)
                .with_detail(detail));
        }
        if let Some((prev, last)) = last_two(&highs[..]).filter(|(p, l)| l < p) {
            let strength = ((prev - last) / prev * 100.0).min(1.0);
            return Ok(Signal::new(self.id(), Direction::Bearish, strength)
                .with_label("BEARISH")
                .with_grade(Grade::High)
                .with_detail(detail));
        }

        Ok(Signal::none(self.id())
            .with_label("NONE")
            .with_grade(Grade::Low)
            .with_detail(detail))
    }

    fn validate_config(&self) -> Result<()> {
        if self.lookback.get() < 2 {
            return Err(crate::AnalysisError::InvalidConfig(
                "market structure shift lookback must be >= 2".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// BREAK OF STRUCTURE
// ============================================================

/// Close beyond the extreme of the last three structure highs/lows
#[derive(Debug, Clone)]
pub struct BreakOfStructureDetector {
    /// Fraction the close must clear the level by
    pub buffer: Ratio,
    pub lookback: Period,
}

impl Default for BreakOfStructureDetector {
    fn default() -> Self {
        Self {
            buffer: Ratio::new_const(BREAK_BUFFER),
            lookback: Period::new_const(STRUCTURE_LOOKBACK),
        }
    }
}

impl Detector for BreakOfStructureDetector {
    fn id(&self) -> DetectorId {
        DetectorId::BREAK_OF_STRUCTURE
    }

    fn min_candles(&self) -> usize {
        MIN_STRUCTURE_CANDLES
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        if ctx.len() < 2 * ctx.swing_window + 1
            || ctx.structure.highs.len() < 2
            || ctx.structure.lows.len() < 2
        {
            return Ok(Signal::insufficient(self.id()));
        }

        let n = self.lookback.get();
        let price = ctx.price();
        let recent_high = ctx
            .structure
            .recent_high_prices(n)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        let recent_low = ctx
            .structure
            .recent_low_prices(n)
            .into_iter()
            .fold(f64::INFINITY, f64::min);
        let buffer = self.buffer.get();

        if price > recent_high * (1.0 + buffer) {
            let strength = ((price - recent_high) / recent_high * 100.0).min(1.0);
            return Ok(Signal::new(self.id(), Direction::Bullish, strength)
                .with_label("BULLISH_BOS")
                .with_detail(structure_detail(ctx, n, Some(recent_high))));
        }
        if price < recent_low * (1.0 - buffer) {
            let strength = ((recent_low - price) / recent_low * 100.0).min(1.0);
            return Ok(Signal::new(self.id(), Direction::Bearish, strength)
                .with_label("BEARISH_BOS")
                .with_detail(structure_detail(ctx, n, Some(recent_low))));
        }

        Ok(Signal::none(self.id())
            .with_label("NONE")
            .with_detail(structure_detail(ctx, n, None)))
    }
}

// ============================================================
// SMC STRUCTURE BREAK
// ============================================================

/// Last structure high above the previous one (bullish), else last structure
/// low below the previous one (bearish). Fixed strength 0.7.
#[derive(Debug, Clone, Default)]
pub struct SmcStructureDetector;

impl Detector for SmcStructureDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SMC_STRUCTURE_BREAK
    }

    fn min_candles(&self) -> usize {
        MIN_STRUCTURE_CANDLES
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let highs = ctx.structure.recent_high_prices(2);
        let lows = ctx.structure.recent_low_prices(2);
        if highs.len() < 2 || lows.len() < 2 {
            return Ok(Signal::none(self.id()));
        }

        let detail = structure_detail(ctx, 2, None);
        if highs[1] > highs[0] {
            Ok(Signal::new(self.id(), Direction::Bullish, 0.7)
                .with_label("BULLISH_STRUCTURE_BREAK")
                .with_detail(detail))
        } else if lows[1] < lows[0] {
            Ok(Signal::new(self.id(), Direction::Bearish, 0.7)
                .with_label("BEARISH_STRUCTURE_BREAK")
                .with_detail(detail))
        } else {
            Ok(Signal::none(self.id()).with_detail(detail))
        }
    }
}

// ============================================================
// ICT LIQUIDITY GRAB REVERSAL
// ============================================================

/// Price pokes through the last structure extreme and the latest close turns
/// back against the poke. Fixed strength 0.8.
#[derive(Debug, Clone)]
pub struct IctReversalDetector {
    pub buffer: Ratio,
}

impl Default for IctReversalDetector {
    fn default() -> Self {
        Self {
            buffer: Ratio::new_const(BREAK_BUFFER),
        }
    }
}

impl Detector for IctReversalDetector {
    fn id(&self) -> DetectorId {
        DetectorId::ICT_LIQUIDITY_GRAB
    }

    fn min_candles(&self) -> usize {
        MIN_STRUCTURE_CANDLES
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let (Some(high), Some(low)) = (ctx.structure.highs.last(), ctx.structure.lows.last())
        else {
            return Ok(Signal::none(self.id()));
        };
        let (Some(last), Some(prev)) = (ctx.primary.close_back(0), ctx.primary.close_back(1))
        else {
            return Ok(Signal::insufficient(self.id()));
        };

        let buffer = self.buffer.get();
        let price = ctx.price();
        let detail = Detail::Structure {
            recent_highs: vec![high.price],
            recent_lows: vec![low.price],
            level: None,
        };

        if price > high.price * (1.0 + buffer) {
            if last < prev {
                return Ok(Signal::new(self.id(), Direction::Bearish, 0.8)
                    .with_label("BEARISH_LIQUIDITY_GRAB")
                    .with_detail(detail));
            }
        } else if price < low.price * (1.0 - buffer) && last > prev {
            return Ok(Signal::new(self.id(), Direction::Bullish, 0.8)
                .with_label("BULLISH_LIQUIDITY_GRAB")
                .with_detail(detail));
        }

        Ok(Signal::none(self.id()).with_detail(detail))
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static MSS_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "lookback",
    3.0,
    (2.0, 6.0, 1.0),
    "Structure points compared",
)];

static BOS_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("buffer", 0.001, (0.0, 0.005, 0.0005), "Break clearance fraction"),
    ParamMeta::period("lookback", 3.0, (2.0, 6.0, 1.0), "Structure points scanned"),
];

static ICT_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "buffer",
    0.001,
    (0.0, 0.005, 0.0005),
    "Poke-through clearance fraction",
)];

impl ParameterizedDetector for MarketStructureShiftDetector {
    fn param_meta() -> &'static [ParamMeta] {
        MSS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", STRUCTURE_LOOKBACK)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::MARKET_STRUCTURE_SHIFT.as_str()
    }
}

impl ParameterizedDetector for BreakOfStructureDetector {
    fn param_meta() -> &'static [ParamMeta] {
        BOS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            buffer: get_ratio(params, "buffer", BREAK_BUFFER)?,
            lookback: get_period(params, "lookback", STRUCTURE_LOOKBACK)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::BREAK_OF_STRUCTURE.as_str()
    }
}

impl ParameterizedDetector for IctReversalDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ICT_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            buffer: get_ratio(params, "buffer", BREAK_BUFFER)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::ICT_LIQUIDITY_GRAB.as_str()
    }
}
