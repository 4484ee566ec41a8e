//! Normalized detector output
//!
//! Every detector reports a [`Signal`]: a direction in the
//! bullish/bearish/neutral alphabet, a strength in `0.0..=1.0` and a
//! detector-specific [`Detail`] payload.

use serde::{Serialize, Serializer};

use crate::detectors::{
    Divergence, FairValueGap, LiquidityZone, OrderBlock, PriceLevel, QuasimodoPattern,
    SupplyDemandZone, WickReversal,
};
use crate::{DetectorId, Direction};

// ============================================================
// FINITE FLOAT SERIALIZATION
// ============================================================

/// Serialize a float, mapping NaN and infinities to `null`.
pub fn finite<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        s.serialize_f64(*value)
    } else {
        s.serialize_none()
    }
}

/// Like [`finite`] for optional floats.
pub fn finite_opt<S: Serializer>(value: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.is_finite() => s.serialize_f64(*v),
        _ => s.serialize_none(),
    }
}

/// Round half away from zero to `decimals` places
#[inline]
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================
// SIGNAL
// ============================================================

/// Outcome of a detector run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Ok,
    /// Fewer candles than the detector needs
    InsufficientData,
    /// The detector returned an error or panicked
    Failed,
}

/// Qualitative strength used by several detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    Low,
    Medium,
    High,
}

impl Grade {
    /// Numeric strength for a grade
    pub fn strength(self) -> f64 {
        match self {
            Grade::Low => 0.3,
            Grade::Medium => 0.6,
            Grade::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub id: DetectorId,
    pub direction: Direction,
    #[serde(serialize_with = "finite")]
    pub strength: f64,
    pub detected: bool,
    pub status: SignalStatus,
    /// Detector-specific type label, e.g. `BULLISH_BOS` or `BEARISH_TO_BULLISH`
    pub label: Option<&'static str>,
    pub grade: Option<Grade>,
    pub detail: Detail,
}

impl Signal {
    /// A detected signal. Strength is clamped into `0.0..=1.0`.
    pub fn new(id: DetectorId, direction: Direction, strength: f64) -> Self {
        Self {
            id,
            direction,
            strength: clamp_unit(strength),
            detected: true,
            status: SignalStatus::Ok,
            label: None,
            grade: None,
            detail: Detail::None,
        }
    }

    /// Ran fine, found nothing
    pub fn none(id: DetectorId) -> Self {
        Self {
            detected: false,
            ..Self::new(id, Direction::Neutral, 0.0)
        }
    }

    pub fn insufficient(id: DetectorId) -> Self {
        Self {
            status: SignalStatus::InsufficientData,
            label: Some("INSUFFICIENT_DATA"),
            ..Self::none(id)
        }
    }

    pub fn failed(id: DetectorId, reason: impl Into<String>) -> Self {
        Self {
            status: SignalStatus::Failed,
            label: Some("ERROR"),
            detail: Detail::Failure {
                reason: reason.into(),
            },
            ..Self::none(id)
        }
    }

    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_grade(mut self, grade: Grade) -> Self {
        self.grade = Some(grade);
        self
    }

    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.detail = detail;
        self
    }

    /// Override the detected flag (some detectors fire without a direction)
    pub fn detected(mut self, detected: bool) -> Self {
        self.detected = detected;
        self
    }

    /// Detected and pointing somewhere
    #[inline]
    pub fn is_directional(&self) -> bool {
        self.detected && self.direction != Direction::Neutral
    }
}

#[inline]
fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================
// DETAIL PAYLOADS
// ============================================================

/// Detector-specific metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detail {
    None,
    /// Structure points and the level that was compared against
    Structure {
        recent_highs: Vec<f64>,
        recent_lows: Vec<f64>,
        #[serde(serialize_with = "finite_opt")]
        level: Option<f64>,
    },
    Character {
        volatility_change: f64,
        recent_trend: f64,
        older_trend: f64,
        trend_flip: bool,
    },
    OrderBlocks {
        bullish: Vec<OrderBlock>,
        bearish: Vec<OrderBlock>,
        count: usize,
    },
    Quasimodo {
        patterns: Vec<QuasimodoPattern>,
    },
    Levels {
        supports: Vec<PriceLevel>,
        resistances: Vec<PriceLevel>,
        #[serde(serialize_with = "finite_opt")]
        nearest_support: Option<f64>,
        #[serde(serialize_with = "finite_opt")]
        nearest_resistance: Option<f64>,
        #[serde(serialize_with = "finite")]
        support_distance_pct: f64,
        #[serde(serialize_with = "finite")]
        resistance_distance_pct: f64,
    },
    Gaps {
        bullish: Vec<FairValueGap>,
        bearish: Vec<FairValueGap>,
        count: usize,
        active: Option<FairValueGap>,
    },
    LiquidityZones {
        zones: Vec<LiquidityZone>,
        count: usize,
    },
    Reversals {
        events: Vec<WickReversal>,
        count: usize,
    },
    Divergences {
        divergences: Vec<Divergence>,
        count: usize,
    },
    Zones {
        zones: Vec<SupplyDemandZone>,
        active: Vec<SupplyDemandZone>,
        count: usize,
    },
    Trend {
        trend: Direction,
        trend_strength: f64,
        adx: f64,
    },
    Factors {
        factors: Vec<&'static str>,
    },
    Failure {
        reason: String,
    },
}

impl Detail {
    /// Number of events recorded by list-style payloads
    pub fn count(&self) -> usize {
        match self {
            Detail::OrderBlocks { count, .. }
            | Detail::Gaps { count, .. }
            | Detail::LiquidityZones { count, .. }
            | Detail::Reversals { count, .. }
            | Detail::Divergences { count, .. }
            | Detail::Zones { count, .. } => *count,
            Detail::Quasimodo { patterns } => patterns.len(),
            _ => 0,
        }
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_places() {
        assert_eq!(round_to(83.64, 1), 83.6);
        assert_eq!(round_to(1.234_567_8, 5), 1.23457);
        assert_eq!(round_to(-1.26, 1), -1.3);
        assert_eq!(round_to(95.0, 1), 95.0);
    }

    #[test]
    fn test_strength_is_clamped() {
        let id = DetectorId("test");
        assert_eq!(Signal::new(id, Direction::Bullish, 3.0).strength, 1.0);
        assert_eq!(Signal::new(id, Direction::Bullish, -1.0).strength, 0.0);
        assert_eq!(Signal::new(id, Direction::Bullish, f64::NAN).strength, 0.0);
    }

    #[test]
    fn test_insufficient_signal() {
        let s = Signal::insufficient(DetectorId("test"));
        assert!(!s.detected);
        assert_eq!(s.direction, Direction::Neutral);
        assert_eq!(s.strength, 0.0);
        assert_eq!(s.status, SignalStatus::InsufficientData);
        assert_eq!(s.label, Some("INSUFFICIENT_DATA"));
    }

    #[test]
    fn test_failed_signal_is_neutral() {
        let s = Signal::failed(DetectorId("test"), "boom");
        assert!(!s.is_directional());
        assert_eq!(s.status, SignalStatus::Failed);
        assert_eq!(
            s.detail,
            Detail::Failure {
                reason: "boom".into()
            }
        );
    }

    #[test]
    fn test_non_finite_serializes_as_null() {
        let detail = Detail::Levels {
            supports: vec![],
            resistances: vec![],
            nearest_support: None,
            nearest_resistance: Some(f64::NAN),
            support_distance_pct: f64::INFINITY,
            resistance_distance_pct: 0.25,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["kind"], "levels");
        assert!(json["nearest_resistance"].is_null());
        assert!(json["support_distance_pct"].is_null());
        assert_eq!(json["resistance_distance_pct"], 0.25);
    }

    #[test]
    fn test_signal_json_shape() {
        let s = Signal::new(DetectorId("break_of_structure"), Direction::Bearish, 0.4)
            .with_label("BEARISH_BOS")
            .with_grade(Grade::High);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["id"], "break_of_structure");
        assert_eq!(json["direction"], "BEARISH");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["grade"], "HIGH");
        assert_eq!(json["detail"]["kind"], "none");
    }
}
