//! Parameter metadata for detectors
//!
//! Tunable thresholds are described by [`ParamMeta`], which enables:
//! - Grid search over detector thresholds
//! - Parameter documentation
//! - Building detectors from external configuration
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use smc_confluence::params::ParameterizedDetector;
//! use smc_confluence::prelude::*;
//!
//! for param in OrderBlockDetector::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let mut params = HashMap::new();
//! params.insert("min_body_ratio", 0.6);
//! let detector = OrderBlockDetector::with_params(&params).unwrap();
//! assert_eq!(detector.min_body_ratio.get(), 0.6);
//! ```

use std::collections::HashMap;

use crate::{AnalysisError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Kind of value a tunable holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0 (tolerances, buffers, body ratios)
  Ratio,
  /// Whole number of candles
  Period,
  /// Positive multiplier, may exceed 1.0 (e.g. volume_factor: 1.5)
  Factor,
}

/// Description of one detector tunable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamMeta {
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Search range as (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn factor(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Factor, default, range, description }
  }

  /// Candidate values from min to max inclusive.
  ///
  /// Values are computed from the step index rather than accumulated, so long
  /// ranges of small steps land on the bounds.
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 || max < min {
      return vec![self.default];
    }
    let steps = ((max - min) / step + 1e-9).floor() as usize;
    (0..=steps).map(|k| min + k as f64 * step).collect()
  }

  /// Check a value against the range and its kind
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if !(min..=max).contains(&value) {
      return Err(AnalysisError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(drop),
      ParamType::Period => whole_candles(value).map(drop),
      ParamType::Factor if value > 0.0 => Ok(()),
      ParamType::Factor => Err(AnalysisError::InvalidValue("Factor must be > 0")),
    }
  }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Detectors that can be built from a name-to-value map
pub trait ParameterizedDetector: Sized {
  fn param_meta() -> &'static [ParamMeta];

  /// Build from `params`; absent names take their defaults
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  fn detector_id_str() -> &'static str;

  /// Default value of every tunable
  fn default_params() -> HashMap<&'static str, f64> {
    Self::param_meta().iter().map(|m| (m.name, m.default)).collect()
  }

  /// Build after checking each supplied value against its declared range.
  ///
  /// Names the detector does not declare are rejected.
  fn with_checked_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let meta = Self::param_meta();
    for (name, value) in params {
      let Some(m) = meta.iter().find(|m| m.name == *name) else {
        return Err(AnalysisError::InvalidConfig(format!(
          "{} has no parameter {name}",
          Self::detector_id_str()
        )));
      };
      m.validate(*value)?;
    }
    Self::with_params(params)
  }
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

fn whole_candles(value: f64) -> Result<usize> {
  if value < 1.0 || value.fract() != 0.0 {
    return Err(AnalysisError::InvalidValue("Period must be a positive integer"));
  }
  Ok(value as usize)
}

/// Ratio under `key`, or `default`
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  Ratio::new(params.get(key).copied().unwrap_or(default))
}

/// Candle count under `key`, or `default`
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  Period::new(whole_candles(value)?)
}

/// Positive finite multiplier under `key`, or `default`
pub fn get_factor(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<f64> {
  match params.get(key).copied().unwrap_or(default) {
    v if v.is_finite() && v > 0.0 => Ok(v),
    _ => Err(AnalysisError::InvalidValue("Factor must be a positive finite number")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detectors::{LiquidityZoneDetector, OrderBlockDetector, QuasimodoDetector};

  #[test]
  fn test_declared_defaults_match_detector_defaults() {
    let defaults = OrderBlockDetector::default_params();
    assert_eq!(defaults["min_body_ratio"], 0.7);
    assert_eq!(defaults["lookahead"], 5.0);

    let built = OrderBlockDetector::with_params(&HashMap::new()).unwrap();
    assert_eq!(built.min_body_ratio.get(), OrderBlockDetector::default().min_body_ratio.get());
  }

  #[test]
  fn test_grid_hits_both_bounds() {
    let body = OrderBlockDetector::param_meta()
      .iter()
      .find(|m| m.name == "min_body_ratio")
      .copied()
      .unwrap();
    let grid = body.generate_grid();
    assert_eq!(grid.len(), 5);
    assert!((grid[0] - 0.5).abs() < 1e-12);
    assert!((grid[4] - 0.9).abs() < 1e-12);

    let fine = ParamMeta::ratio("extension", 0.002, (0.001, 0.005, 0.001), "");
    assert_eq!(fine.generate_grid().len(), 5);
  }

  #[test]
  fn test_checked_params_reject_out_of_range_and_unknown() {
    let mut params = HashMap::new();
    params.insert("lookahead", 7.0);
    assert_eq!(OrderBlockDetector::with_checked_params(&params).unwrap().lookahead.get(), 7);

    params.insert("lookahead", 30.0);
    assert!(matches!(
      OrderBlockDetector::with_checked_params(&params),
      Err(AnalysisError::OutOfRange { field: "lookahead", .. })
    ));

    let mut unknown = HashMap::new();
    unknown.insert("shoulder_tolerance", 0.01);
    assert!(matches!(
      OrderBlockDetector::with_checked_params(&unknown),
      Err(AnalysisError::InvalidConfig(_))
    ));
    assert!(QuasimodoDetector::with_checked_params(&unknown).is_ok());
  }

  #[test]
  fn test_period_and_factor_kinds() {
    let lookahead = ParamMeta::period("lookahead", 5.0, (3.0, 10.0, 1.0), "");
    assert!(lookahead.validate(4.0).is_ok());
    assert!(lookahead.validate(4.5).is_err());

    let mut params = HashMap::new();
    params.insert("volume_factor", 0.0);
    assert!(LiquidityZoneDetector::with_params(&params).is_err());
    assert_eq!(get_factor(&HashMap::new(), "volume_factor", 1.5).unwrap(), 1.5);
    assert_eq!(get_period(&HashMap::new(), "window", 5).unwrap().get(), 5);
  }
}
