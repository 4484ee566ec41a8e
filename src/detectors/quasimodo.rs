//! Quasimodo (QML) head-and-shoulders variant over three short windows.

use std::collections::HashMap;

use serde::Serialize;

use super::helpers::{max_high, min_low};
use crate::{
    params::{get_ratio, ParamMeta, ParameterizedDetector},
    series::Candle,
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, Ratio, Result, Signal,
};

impl_with_defaults!(QuasimodoDetector);

/// Patterns kept in the detail payload
const KEEP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuasimodoPattern {
    pub direction: Direction,
    /// Last candle of the head window
    pub index: usize,
    pub left_shoulder: f64,
    pub head: f64,
    pub right_shoulder: f64,
    /// Mean of the two shoulders' opposite extremes
    pub neckline: f64,
    /// 1.0 for identical shoulders, 0.0 at the tolerance limit
    pub symmetry: f64,
}

/// Left shoulder `[i-6, i-3)`, head `[i-3, i]`, right shoulder `[i+1, i+4)`.
///
/// Bullish when the head low undercuts both shoulder lows and the shoulders
/// sit within `shoulder_tolerance` of each other; bearish mirrors on highs.
#[derive(Debug, Clone)]
pub struct QuasimodoDetector {
    pub shoulder_tolerance: Ratio,
}

impl Default for QuasimodoDetector {
    fn default() -> Self {
        Self {
            shoulder_tolerance: Ratio::new_const(0.01),
        }
    }
}

impl QuasimodoDetector {
    pub fn patterns(&self, candles: &[Candle]) -> Vec<QuasimodoPattern> {
        let tol = self.shoulder_tolerance.get();
        let mut found = Vec::new();

        for i in 7..candles.len().saturating_sub(7) {
            let left = &candles[i - 6..i - 3];
            let head = &candles[i - 3..=i];
            let right = &candles[i + 1..i + 4];

            let (ls, hd, rs) = (min_low(left), min_low(head), min_low(right));
            let spread = (ls - rs).abs();
            if hd < ls && hd < rs && spread < ls * tol {
                found.push(QuasimodoPattern {
                    direction: Direction::Bullish,
                    index: i,
                    left_shoulder: ls,
                    head: hd,
                    right_shoulder: rs,
                    neckline: (max_high(left) + max_high(right)) / 2.0,
                    symmetry: symmetry(spread, ls * tol),
                });
            }

            let (ls, hd, rs) = (max_high(left), max_high(head), max_high(right));
            let spread = (ls - rs).abs();
            if hd > ls && hd > rs && spread < ls * tol {
                found.push(QuasimodoPattern {
                    direction: Direction::Bearish,
                    index: i,
                    left_shoulder: ls,
                    head: hd,
                    right_shoulder: rs,
                    neckline: (min_low(left) + min_low(right)) / 2.0,
                    symmetry: symmetry(spread, ls * tol),
                });
            }
        }
        found
    }
}

#[inline]
fn symmetry(spread: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        (1.0 - spread / limit).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl Detector for QuasimodoDetector {
    fn id(&self) -> DetectorId {
        DetectorId::QUASIMODO
    }

    fn min_candles(&self) -> usize {
        15
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let mut patterns = self.patterns(ctx.candles());
        let excess = patterns.len().saturating_sub(KEEP);
        patterns.drain(..excess);

        let Some(latest) = patterns.last().copied() else {
            return Ok(Signal::none(self.id()).with_detail(Detail::Quasimodo { patterns }));
        };
        Ok(
            Signal::new(self.id(), latest.direction, 0.5 + 0.5 * latest.symmetry)
                .with_label(match latest.direction {
                    Direction::Bullish => "BULLISH_QML",
                    _ => "BEARISH_QML",
                })
                .with_grade(Grade::High)
                .with_detail(Detail::Quasimodo { patterns }),
        )
    }
}

static QUASIMODO_PARAMS: &[ParamMeta] = &[ParamMeta::ratio(
    "shoulder_tolerance",
    0.01,
    (0.005, 0.02, 0.005),
    "Maximum relative difference between shoulders",
)];

impl ParameterizedDetector for QuasimodoDetector {
    fn param_meta() -> &'static [ParamMeta] {
        QUASIMODO_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.01)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::QUASIMODO.as_str()
    }
}
