//! Change of character: the last ten candles against the ten before them.

use std::collections::HashMap;

use super::helpers::{avg_range, window_trend};
use crate::{
    params::{get_ratio, ParamMeta, ParameterizedDetector},
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, Ratio, Result, Signal,
};

impl_with_defaults!(ChangeOfCharacterDetector);

/// Candles in the recent comparison window
const RECENT_WINDOW: usize = 10;

/// Volatility shift and/or trend reversal between consecutive windows.
///
/// Detected when mean range changes by more than `volatility_threshold` or the
/// two window trends have opposite signs.
#[derive(Debug, Clone)]
pub struct ChangeOfCharacterDetector {
    pub volatility_threshold: Ratio,
    /// Volatility change that alone makes a `VOLATILITY_CHANGE` label
    pub strong_volatility: Ratio,
    /// Trend difference that grades the change HIGH
    pub strong_trend_delta: Ratio,
}

impl Default for ChangeOfCharacterDetector {
    fn default() -> Self {
        Self {
            volatility_threshold: Ratio::new_const(0.3),
            strong_volatility: Ratio::new_const(0.5),
            strong_trend_delta: Ratio::new_const(0.05),
        }
    }
}

impl Detector for ChangeOfCharacterDetector {
    fn id(&self) -> DetectorId {
        DetectorId::CHANGE_OF_CHARACTER
    }

    fn min_candles(&self) -> usize {
        15
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let candles = ctx.candles();
        let len = candles.len();
        let recent = &candles[len - RECENT_WINDOW..];
        let older = if len >= 2 * RECENT_WINDOW {
            &candles[len - 2 * RECENT_WINDOW..len - RECENT_WINDOW]
        } else {
            &candles[..len - RECENT_WINDOW]
        };

        let recent_vol = avg_range(recent);
        let older_vol = avg_range(older);
        let volatility_change = if older_vol > 0.0 {
            (recent_vol - older_vol).abs() / older_vol
        } else {
            0.0
        };

        let recent_trend = window_trend(recent);
        let older_trend = window_trend(older);
        let trend_flip = recent_trend * older_trend < 0.0;
        let trend_delta = (recent_trend - older_trend).abs();

        let detail = Detail::Character {
            volatility_change,
            recent_trend,
            older_trend,
            trend_flip,
        };

        if volatility_change <= self.volatility_threshold.get() && !trend_flip {
            return Ok(Signal::none(self.id()).with_label("NONE").with_detail(detail));
        }

        let (direction, label) = if recent_trend > 0.0 && older_trend < 0.0 {
            (Direction::Bullish, "BEARISH_TO_BULLISH")
        } else if recent_trend < 0.0 && older_trend > 0.0 {
            (Direction::Bearish, "BULLISH_TO_BEARISH")
        } else if volatility_change > self.strong_volatility.get() {
            (Direction::Neutral, "VOLATILITY_CHANGE")
        } else {
            (Direction::Neutral, "NONE")
        };

        let grade = if volatility_change > self.strong_volatility.get()
            || trend_delta > self.strong_trend_delta.get()
        {
            Grade::High
        } else {
            Grade::Medium
        };
        let strength = volatility_change.max(trend_delta * 10.0);

        Ok(Signal::new(self.id(), direction, strength)
            .with_label(label)
            .with_grade(grade)
            .with_detail(detail))
    }
}

static CHOCH_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "volatility_threshold",
        0.3,
        (0.1, 0.6, 0.1),
        "Mean-range change that counts as a change of character",
    ),
    ParamMeta::ratio(
        "strong_volatility",
        0.5,
        (0.3, 1.0, 0.1),
        "Mean-range change graded HIGH",
    ),
    ParamMeta::ratio(
        "strong_trend_delta",
        0.05,
        (0.01, 0.1, 0.01),
        "Trend difference graded HIGH",
    ),
];

impl ParameterizedDetector for ChangeOfCharacterDetector {
    fn param_meta() -> &'static [ParamMeta] {
        CHOCH_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            volatility_threshold: get_ratio(params, "volatility_threshold", 0.3)?,
            strong_volatility: get_ratio(params, "strong_volatility", 0.5)?,
            strong_trend_delta: get_ratio(params, "strong_trend_delta", 0.05)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::CHANGE_OF_CHARACTER.as_str()
    }
}
