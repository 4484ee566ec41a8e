//! Smart money divergence: price momentum against volume momentum.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    indicators::{mean, pct_change},
    params::{get_ratio, ParamMeta, ParameterizedDetector},
    signal::{Detail, Grade},
    AnalysisContext, Detector, DetectorId, Direction, Ratio, Result, Signal,
};

impl_with_defaults!(SmartMoneyDivergenceDetector);

/// Momentum lag and averaging window
const MOMENTUM_PERIOD: usize = 5;
/// Trailing momentum values examined
const TRAILING: usize = 10;
/// Divergences kept in the detail payload
const KEEP: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Divergence {
    pub direction: Direction,
    /// Series index of the last momentum value in the averaging window
    pub index: usize,
    pub price_momentum: f64,
    pub volume_momentum: f64,
    pub grade: Grade,
}

/// Falling price on rising volume (bullish) or rising price on falling volume
/// (bearish), using five-candle momentum averaged over five values.
#[derive(Debug, Clone)]
pub struct SmartMoneyDivergenceDetector {
    pub price_threshold: Ratio,
    pub volume_threshold: Ratio,
    /// Price momentum graded HIGH
    pub strong_price: Ratio,
}

impl Default for SmartMoneyDivergenceDetector {
    fn default() -> Self {
        Self {
            price_threshold: Ratio::new_const(0.01),
            volume_threshold: Ratio::new_const(0.1),
            strong_price: Ratio::new_const(0.02),
        }
    }
}

impl SmartMoneyDivergenceDetector {
    pub fn divergences(&self, ctx: &AnalysisContext<'_>) -> Vec<Divergence> {
        let price_mom = pct_change(&ctx.primary.closes(), MOMENTUM_PERIOD);
        let volume_mom = pct_change(&ctx.primary.volumes(), MOMENTUM_PERIOD);
        if price_mom.len() < TRAILING {
            return Vec::new();
        }

        let price_tail = &price_mom[price_mom.len() - TRAILING..];
        let volume_tail = &volume_mom[volume_mom.len() - TRAILING..];
        let base = ctx.len() - TRAILING;
        let (pt, vt) = (self.price_threshold.get(), self.volume_threshold.get());

        let mut found = Vec::new();
        for i in MOMENTUM_PERIOD..TRAILING {
            let (Some(price), Some(volume)) = (
                mean(&price_tail[i - MOMENTUM_PERIOD..i]),
                mean(&volume_tail[i - MOMENTUM_PERIOD..i]),
            ) else {
                continue;
            };

            let direction = if price < -pt && volume > vt {
                Direction::Bullish
            } else if price > pt && volume < -vt {
                Direction::Bearish
            } else {
                continue;
            };
            found.push(Divergence {
                direction,
                index: base + i - 1,
                price_momentum: price,
                volume_momentum: volume,
                grade: if price.abs() > self.strong_price.get() {
                    Grade::High
                } else {
                    Grade::Medium
                },
            });
        }
        found
    }
}

impl Detector for SmartMoneyDivergenceDetector {
    fn id(&self) -> DetectorId {
        DetectorId::SMART_MONEY_DIVERGENCE
    }

    fn min_candles(&self) -> usize {
        20
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let mut divergences = self.divergences(ctx);
        let count = divergences.len();
        let excess = count.saturating_sub(KEEP);
        divergences.drain(..excess);

        let Some(latest) = divergences.last().copied() else {
            return Ok(Signal::none(self.id()).with_detail(Detail::Divergences {
                divergences,
                count,
            }));
        };
        Ok(Signal::new(self.id(), latest.direction, latest.grade.strength())
            .with_label(match latest.direction {
                Direction::Bullish => "BULLISH_DIVERGENCE",
                _ => "BEARISH_DIVERGENCE",
            })
            .with_grade(latest.grade)
            .with_detail(Detail::Divergences { divergences, count }))
    }
}

static SMD_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "price_threshold",
        0.01,
        (0.005, 0.03, 0.005),
        "Average price momentum magnitude",
    ),
    ParamMeta::ratio(
        "volume_threshold",
        0.1,
        (0.05, 0.3, 0.05),
        "Average volume momentum magnitude",
    ),
];

impl ParameterizedDetector for SmartMoneyDivergenceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SMD_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            price_threshold: get_ratio(params, "price_threshold", 0.01)?,
            volume_threshold: get_ratio(params, "volume_threshold", 0.1)?,
            ..Self::default()
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::SMART_MONEY_DIVERGENCE.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{Candle, CandleSeries};

    #[test]
    fn test_falling_price_on_rising_volume_is_bullish() {
        let candles = (0..30)
            .map(|i| {
                let c = 200.0 - i as f64 * 3.0;
                Candle::new(i, c + 1.0, c + 1.5, c - 0.5, c).with_volume(1000.0 * 1.1f64.powi(i as i32))
            })
            .collect();
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sig = SmartMoneyDivergenceDetector::default().detect(&ctx).unwrap();
        assert_eq!(sig.direction, Direction::Bullish);
        assert_eq!(sig.detail.count(), 5);
        match sig.detail {
            Detail::Divergences { divergences, .. } => assert_eq!(divergences.len(), 3),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn test_steady_market_has_no_divergence() {
        let candles = (0..30)
            .map(|i| Candle::new(i, 100.0, 100.5, 99.5, 100.0))
            .collect();
        let s = CandleSeries::new(candles).unwrap();
        let ctx = AnalysisContext::single(&s, 5);
        let sig = SmartMoneyDivergenceDetector::default().detect(&ctx).unwrap();
        assert!(!sig.detected);
    }
}
