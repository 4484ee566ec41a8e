//! Confluence inputs: timeframe structure bias, the QMLR multi-factor check
//! and classic indicator confirmation.

use std::collections::HashMap;

use super::helpers::check_positive;
use crate::{
    indicators::{adx, ema, macd, mean, rsi, stochastic_k, trend_strength},
    params::{get_factor, get_ratio, ParamMeta, ParameterizedDetector},
    series::{CandleSeries, Swings},
    signal::Detail,
    AnalysisContext, Detector, DetectorId, Direction, Ratio, Result, Signal,
};

impl_with_defaults!(
    HigherTimeframeBiasDetector,
    LowerTimeframeStructureDetector,
    QmlrConfluenceDetector,
    TraditionalConfirmationDetector,
);

/// Candles needed for a structure reading
const MIN_STRUCTURE_READING: usize = 20;

// ============================================================
// TIMEFRAME STRUCTURE
// ============================================================

/// Trend read from structure points plus composite trend strength
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructureReading {
    pub trend: Direction,
    pub strength: f64,
    pub adx: f64,
    /// `trend` when strength clears the bias threshold, else neutral
    pub bias: Direction,
}

/// Higher highs with higher lows is bullish, lower highs with lower lows is
/// bearish, anything else sideways (neutral).
pub fn structure_trend(points: &Swings) -> Direction {
    if points.highs.len() < 2 || points.lows.len() < 2 {
        return Direction::Neutral;
    }
    let highs = points.recent_high_prices(3);
    let lows = points.recent_low_prices(3);
    let rising = |v: &[f64]| v.windows(2).all(|w| w[1] > w[0]);
    let falling = |v: &[f64]| v.windows(2).all(|w| w[1] < w[0]);

    if rising(&highs) && rising(&lows) {
        Direction::Bullish
    } else if falling(&highs) && falling(&lows) {
        Direction::Bearish
    } else {
        Direction::Neutral
    }
}

/// Structure reading of one series; `None` below twenty candles.
pub fn read_structure(
    series: &CandleSeries,
    points: &Swings,
    bias_threshold: f64,
) -> Option<StructureReading> {
    if series.len() < MIN_STRUCTURE_READING {
        return None;
    }
    let trend = structure_trend(points);
    let strength = trend_strength(series.candles());
    Some(StructureReading {
        trend,
        strength,
        adx: adx(series.candles(), 14).unwrap_or(25.0),
        bias: if strength > bias_threshold {
            trend
        } else {
            Direction::Neutral
        },
    })
}

fn structure_signal(id: DetectorId, reading: Option<StructureReading>) -> Signal {
    let Some(r) = reading else {
        return Signal::insufficient(id);
    };
    let label = match r.trend {
        Direction::Neutral => "SIDEWAYS",
        other => other.label(),
    };
    Signal::new(id, r.bias, r.strength)
        .with_label(label)
        .with_detail(Detail::Trend {
            trend: r.trend,
            trend_strength: r.strength,
            adx: r.adx,
        })
        .detected(!r.bias.is_neutral())
}

/// Structure bias of the higher-timeframe series
#[derive(Debug, Clone)]
pub struct HigherTimeframeBiasDetector {
    pub bias_threshold: Ratio,
}

impl Default for HigherTimeframeBiasDetector {
    fn default() -> Self {
        Self {
            bias_threshold: Ratio::new_const(0.6),
        }
    }
}

impl Detector for HigherTimeframeBiasDetector {
    fn id(&self) -> DetectorId {
        DetectorId::HTF_BIAS
    }

    fn min_candles(&self) -> usize {
        MIN_STRUCTURE_READING
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let reading = read_structure(ctx.higher, &ctx.higher_structure, self.bias_threshold.get());
        Ok(structure_signal(self.id(), reading))
    }
}

/// Structure bias of the primary series
#[derive(Debug, Clone)]
pub struct LowerTimeframeStructureDetector {
    pub bias_threshold: Ratio,
}

impl Default for LowerTimeframeStructureDetector {
    fn default() -> Self {
        Self {
            bias_threshold: Ratio::new_const(0.6),
        }
    }
}

impl Detector for LowerTimeframeStructureDetector {
    fn id(&self) -> DetectorId {
        DetectorId::LTF_STRUCTURE
    }

    fn min_candles(&self) -> usize {
        MIN_STRUCTURE_READING
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let reading = read_structure(ctx.primary, &ctx.structure, self.bias_threshold.get());
        Ok(structure_signal(self.id(), reading))
    }
}

// ============================================================
// QMLR MULTI-FACTOR
// ============================================================

/// Fires when at least two of: strong trend, volume expansion, and agreement
/// between the primary and higher-timeframe trend signs.
#[derive(Debug, Clone)]
pub struct QmlrConfluenceDetector {
    pub trend_threshold: Ratio,
    /// Last-5 to last-20 mean volume ratio
    pub volume_ratio: f64,
}

impl Default for QmlrConfluenceDetector {
    fn default() -> Self {
        Self {
            trend_threshold: Ratio::new_const(0.7),
            volume_ratio: 1.2,
        }
    }
}

impl QmlrConfluenceDetector {
    pub fn factors(&self, ctx: &AnalysisContext<'_>) -> Vec<&'static str> {
        let mut factors = Vec::new();

        if trend_strength(ctx.candles()) > self.trend_threshold.get() {
            factors.push("STRONG_TREND");
        }

        let volumes = ctx.primary.volumes();
        let recent = mean(&volumes[volumes.len().saturating_sub(5)..]);
        let longer = mean(&volumes[volumes.len().saturating_sub(20)..]);
        if let (Some(recent), Some(longer)) = (recent, longer) {
            if longer > 0.0 && recent / longer > self.volume_ratio {
                factors.push("VOLUME_CONFIRM");
            }
        }

        let primary_up = match (ctx.primary.close_back(0), ctx.primary.close_back(19)) {
            (Some(now), Some(then)) => Some(now > then),
            _ => None,
        };
        let higher_up = match (ctx.higher.close_back(0), ctx.higher.close_back(9)) {
            (Some(now), Some(then)) => Some(now > then),
            _ => None,
        };
        if let (Some(a), Some(b)) = (primary_up, higher_up) {
            if a == b {
                factors.push("MTF_ALIGN");
            }
        }
        factors
    }
}

impl Detector for QmlrConfluenceDetector {
    fn id(&self) -> DetectorId {
        DetectorId::QMLR_CONFLUENCE
    }

    fn min_candles(&self) -> usize {
        20
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let factors = self.factors(ctx);
        if factors.len() < 2 {
            return Ok(Signal::none(self.id()).with_detail(Detail::Factors { factors }));
        }

        let rising = match (ctx.primary.close_back(0), ctx.primary.close_back(9)) {
            (Some(now), Some(then)) => now > then,
            _ => false,
        };
        let direction = if rising {
            Direction::Bullish
        } else {
            Direction::Bearish
        };
        let strength = factors.len() as f64 / 3.0;
        Ok(Signal::new(self.id(), direction, strength)
            .with_label(direction.label())
            .with_detail(Detail::Factors { factors }))
    }
    fn validate_config(&self) -> Result<()> {
        check_positive(self.id().as_str(), "volume_ratio", self.volume_ratio)
    }
}

// ============================================================
// TRADITIONAL INDICATOR CONFIRMATION
// ============================================================

/// Majority vote of RSI, MACD, EMA stack and stochastic readings
#[derive(Debug, Clone)]
pub struct TraditionalConfirmationDetector {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
}

impl Default for TraditionalConfirmationDetector {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
        }
    }
}

impl TraditionalConfirmationDetector {
    /// Every indicator vote with its reason, indicators lacking data skipped
    pub fn votes(&self, series: &CandleSeries) -> Vec<(Direction, &'static str)> {
        let closes = series.closes();
        let price = series.current_price().unwrap_or(0.0);
        let mut votes = Vec::new();

        match rsi(&closes, 14) {
            Some(v) if v < self.rsi_oversold => votes.push((Direction::Bullish, "RSI_OVERSOLD")),
            Some(v) if v > self.rsi_overbought => {
                votes.push((Direction::Bearish, "RSI_OVERBOUGHT"))
            },
            _ => {},
        }

        if let Some((line, signal)) = macd(&closes, 12, 26, 9) {
            votes.push(if line > signal {
                (Direction::Bullish, "MACD_BULLISH")
            } else {
                (Direction::Bearish, "MACD_BEARISH")
            });
        }

        if let (Some(fast), Some(slow)) = (ema(&closes, 21), ema(&closes, 50)) {
            if price > fast && fast > slow {
                votes.push((Direction::Bullish, "EMA_BULLISH_STACK"));
            } else if price < fast && fast < slow {
                votes.push((Direction::Bearish, "EMA_BEARISH_STACK"));
            }
        }

        match stochastic_k(series.candles(), 14) {
            Some(k) if k < self.stoch_oversold => {
                votes.push((Direction::Bullish, "STOCH_OVERSOLD"))
            },
            Some(k) if k > self.stoch_overbought => {
                votes.push((Direction::Bearish, "STOCH_OVERBOUGHT"))
            },
            _ => {},
        }
        votes
    }
}

impl Detector for TraditionalConfirmationDetector {
    fn id(&self) -> DetectorId {
        DetectorId::TRADITIONAL
    }

    fn min_candles(&self) -> usize {
        15
    }

    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
        let votes = self.votes(ctx.primary);
        let bullish = votes.iter().filter(|(d, _)| d.is_bullish()).count();
        let bearish = votes.iter().filter(|(d, _)| d.is_bearish()).count();
        let direction = Direction::from_counts(bullish, bearish);
        let factors = votes.iter().map(|(_, reason)| *reason).collect();

        if direction.is_neutral() {
            return Ok(Signal::none(self.id()).with_detail(Detail::Factors { factors }));
        }
        let strength = bullish.max(bearish) as f64 / votes.len() as f64;
        Ok(Signal::new(self.id(), direction, strength)
            .with_label(direction.label())
            .with_detail(Detail::Factors { factors }))
    }

    fn validate_config(&self) -> Result<()> {
        let thresholds = [
            self.rsi_oversold,
            self.rsi_overbought,
            self.stoch_oversold,
            self.stoch_overbought,
        ];
        if thresholds.iter().any(|t| !(0.0..=100.0).contains(t)) {
            return Err(crate::AnalysisError::InvalidConfig(
                "oscillator thresholds must lie in 0..=100".to_string(),
            ));
        }
        if self.rsi_oversold >= self.rsi_overbought || self.stoch_oversold >= self.stoch_overbought
        {
            return Err(crate::AnalysisError::InvalidConfig(
                "oversold thresholds must be below overbought thresholds".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// PARAMETER METADATA
// ============================================================

static QMLR_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "trend_threshold",
        0.7,
        (0.5, 0.9, 0.1),
        "Trend strength counted as strong",
    ),
    ParamMeta::factor(
        "volume_ratio",
        1.2,
        (1.0, 2.0, 0.1),
        "Recent-to-longer volume ratio counted as confirmation",
    ),
];

impl ParameterizedDetector for QmlrConfluenceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        QMLR_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            trend_threshold: get_ratio(params, "trend_threshold", 0.7)?,
            volume_ratio: get_factor(params, "volume_ratio", 1.2)?,
        })
    }

    fn detector_id_str() -> &'static str {
        DetectorId::QMLR_CONFLUENCE.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{series::Candle, ContextProvider, DefaultContextProvider};

    fn trend(n: usize, step: f64) -> CandleSeries {
        let candles = (0..n)
            .map(|i| {
                let c = 150.0 + i as f64 * step;
                let (o, h, l) = if step >= 0.0 {
                    (c - 0.3, c + 0.2, c - 0.5)
                } else {
                    (c + 0.3, c + 0.5, c - 0.2)
                };
                Candle::new(i as i64, o, h, l, c)
            })
            .collect();
        CandleSeries::new(candles).unwrap()
    }

    #[test]
    fn test_structure_bias_in_uptrend() {
        let s = trend(100, 0.5);
        let ctx = AnalysisContext::single(&s, 5);
        let sig = HigherTimeframeBiasDetector::default().detect(&ctx).unwrap();
        assert_eq!(sig.direction, Direction::Bullish);
        assert!(sig.strength > 0.6);
        assert_eq!(sig.label, Some("BULLISH"));
    }

    #[test]
    fn test_structure_needs_twenty_higher_candles() {
        let primary = trend(60, 0.5);
        let higher = trend(10, 0.5);
        let ctx = DefaultContextProvider.build(&primary, &higher, 5);
        let sig = HigherTimeframeBiasDetector::default().detect(&ctx).unwrap();
        assert_eq!(sig.status, crate::signal::SignalStatus::InsufficientData);
    }

    #[test]
    fn test_qmlr_fires_on_strong_aligned_trend() {
        let s = trend(100, -0.5);
        let ctx = AnalysisContext::single(&s, 5);
        let sig = QmlrConfluenceDetector::default().detect(&ctx).unwrap();
        assert_eq!(sig.direction, Direction::Bearish);
        match &sig.detail {
            Detail::Factors { factors } => assert!(factors.contains(&"MTF_ALIGN")),
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn test_traditional_votes() {
        let s = trend(80, 0.5);
        let votes = TraditionalConfirmationDetector::default().votes(&s);
        assert!(votes.contains(&(Direction::Bearish, "RSI_OVERBOUGHT")));
        assert!(votes.contains(&(Direction::Bullish, "EMA_BULLISH_STACK")));
    }
}
