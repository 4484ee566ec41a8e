//! Signal aggregation
//!
//! Two strategies merge a [`SignalSet`] into a [`Prediction`]:
//!
//! - [`Aggregator::SmcBias`]: integer votes from the smart-money detectors and
//!   the mean of fixed per-detector confidence constants.
//! - [`Aggregator::MultiFactor`]: weighted strengths over the confluence
//!   inputs, majority direction and a bonus-based confidence in `70..=95`.
//!
//! [`SmcReport`] runs both and adds the continuation, next-move and key-level
//! reads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    signal::{finite, round_to, Detail, Grade, Signal},
    DetectorId, Direction, SignalSet,
};

/// Floor of the multi-factor confidence
const BASE_CONFIDENCE: f64 = 70.0;
/// Ceiling of the multi-factor confidence
const MAX_CONFIDENCE: f64 = 95.0;
/// SMC confidence when nothing fired
const SMC_DEFAULT_CONFIDENCE: f64 = 50.0;
/// Confidence at which one strategy alone decides the blended direction
const DECISIVE_CONFIDENCE: f64 = 75.0;

// ============================================================
// PREDICTION
// ============================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictedDirection {
    Up,
    Down,
    Sideways,
    #[default]
    Unknown,
}

impl PredictedDirection {
    /// Bullish is up, bearish down, neutral sideways
    pub fn from_direction(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => PredictedDirection::Up,
            Direction::Bearish => PredictedDirection::Down,
            Direction::Neutral => PredictedDirection::Sideways,
        }
    }

    #[inline]
    pub fn is_directional(self) -> bool {
        matches!(self, PredictedDirection::Up | PredictedDirection::Down)
    }

    pub fn label(self) -> &'static str {
        match self {
            PredictedDirection::Up => "UP",
            PredictedDirection::Down => "DOWN",
            PredictedDirection::Sideways => "SIDEWAYS",
            PredictedDirection::Unknown => "UNKNOWN",
        }
    }
}

/// Boolean confluence checks shared by both strategies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfluenceFactors {
    /// Higher and lower timeframe structure point the same way
    pub htf_ltf_alignment: bool,
    /// Break of structure or change of character detected
    pub structure_signals: bool,
    /// Fair value gaps carry a direction
    pub liquidity_signals: bool,
    /// Price sits near a support or resistance level
    pub level_proximity: bool,
}

impl ConfluenceFactors {
    pub fn from_signals(set: &SignalSet) -> Self {
        let directional = |id| set.get(id).filter(|s| s.is_directional()).map(|s| s.direction);
        let htf = directional(DetectorId::HTF_BIAS);
        Self {
            htf_ltf_alignment: htf.is_some() && htf == directional(DetectorId::LTF_STRUCTURE),
            structure_signals: set.is_detected(DetectorId::BREAK_OF_STRUCTURE)
                || set.is_detected(DetectorId::CHANGE_OF_CHARACTER),
            liquidity_signals: directional(DetectorId::FAIR_VALUE_GAP).is_some(),
            level_proximity: directional(DetectorId::SUPPORT_RESISTANCE).is_some(),
        }
    }

    /// Number of true factors
    pub fn count(&self) -> usize {
        [
            self.htf_ltf_alignment,
            self.structure_signals,
            self.liquidity_signals,
            self.level_proximity,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }
}

/// Vote tallies behind a prediction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalBreakdown {
    pub up: usize,
    pub down: usize,
    pub total: usize,
    /// Contribution of each voting detector
    pub weights: BTreeMap<&'static str, f64>,
    #[serde(serialize_with = "finite")]
    pub total_weight: f64,
}

/// Directional call with confidence and the signals behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub direction: PredictedDirection,
    /// Always within `0.0..=100.0`
    #[serde(serialize_with = "finite")]
    pub confidence: f64,
    pub meets_threshold: bool,
    #[serde(serialize_with = "finite")]
    pub current_price: f64,
    pub strategy: Aggregator,
    pub component_breakdown: BTreeMap<&'static str, Signal>,
    pub confluence_factors: ConfluenceFactors,
    pub signal_breakdown: SignalBreakdown,
    /// Set once a visual reading has been compared against the direction
    pub visual_confirmation: Option<bool>,
}

impl Prediction {
    fn new(
        strategy: Aggregator,
        set: &SignalSet,
        direction: PredictedDirection,
        confidence: f64,
        min_confidence: f64,
        signal_breakdown: SignalBreakdown,
    ) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            direction,
            confidence,
            meets_threshold: confidence >= min_confidence,
            current_price: set.current_price,
            strategy,
            component_breakdown: set.breakdown(),
            confluence_factors: ConfluenceFactors::from_signals(set),
            signal_breakdown,
            visual_confirmation: None,
        }
    }

    fn levels(&self) -> Option<(Option<f64>, Option<f64>)> {
        match &self.component_breakdown.get(DetectorId::SUPPORT_RESISTANCE.as_str())?.detail {
            Detail::Levels {
                nearest_support,
                nearest_resistance,
                ..
            } => Some((*nearest_support, *nearest_resistance)),
            _ => None,
        }
    }

    /// Nearest support below price, from the support/resistance signal
    pub fn nearest_support(&self) -> Option<f64> {
        self.levels().and_then(|(s, _)| s)
    }

    /// Nearest resistance above price, from the support/resistance signal
    pub fn nearest_resistance(&self) -> Option<f64> {
        self.levels().and_then(|(_, r)| r)
    }
}

// ============================================================
// AGGREGATOR
// ============================================================

/// Aggregation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregator {
    /// Smart-money vote counting
    SmcBias,
    /// Weighted confluence scoring
    #[default]
    MultiFactor,
}

impl Aggregator {
    pub fn aggregate(self, set: &SignalSet, min_confidence: f64) -> Prediction {
        match self {
            Aggregator::SmcBias => smc_bias(set, min_confidence),
            Aggregator::MultiFactor => multi_factor(set, min_confidence),
        }
    }
}

// ============================================================
// SMC BIAS
// ============================================================

/// Vote weight per smart-money detector
const SMC_VOTES: &[(DetectorId, usize)] = &[
    (DetectorId::MARKET_STRUCTURE_SHIFT, 2),
    (DetectorId::CHANGE_OF_CHARACTER, 2),
    (DetectorId::ORDER_BLOCKS, 1),
    (DetectorId::FAIR_VALUE_GAP, 1),
    (DetectorId::LIQUIDITY_SWEEP, 1),
    (DetectorId::LIQUIDITY_GRAB, 1),
    (DetectorId::SMART_MONEY_DIVERGENCE, 1),
];

/// Confidence constant of a fired smart-money detector
fn smc_confidence(signal: &Signal) -> Option<f64> {
    let high = signal.grade == Some(Grade::High);
    let value = match signal.id {
        DetectorId::MARKET_STRUCTURE_SHIFT if high => 85.0,
        DetectorId::MARKET_STRUCTURE_SHIFT => 70.0,
        DetectorId::ORDER_BLOCKS => 75.0,
        DetectorId::QUASIMODO => 80.0,
        DetectorId::FAIR_VALUE_GAP => 70.0,
        DetectorId::LIQUIDITY_SWEEP | DetectorId::LIQUIDITY_GRAB => 75.0,
        DetectorId::CHANGE_OF_CHARACTER if high => 80.0,
        DetectorId::CHANGE_OF_CHARACTER => 65.0,
        DetectorId::SMART_MONEY_DIVERGENCE => 70.0,
        _ => return None,
    };
    Some(value)
}

/// Result of smart-money vote counting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BiasTally {
    /// Neutral unless one side leads by more than one vote
    pub bias: Direction,
    pub bullish_signals: usize,
    pub bearish_signals: usize,
    #[serde(serialize_with = "finite")]
    pub confidence_score: f64,
    pub weights: BTreeMap<&'static str, f64>,
}

impl BiasTally {
    pub fn from_signals(set: &SignalSet) -> Self {
        let mut tally = Self::default();
        for &(id, votes) in SMC_VOTES {
            let Some(signal) = set.get(id).filter(|s| s.is_directional()) else {
                continue;
            };
            if signal.direction.is_bullish() {
                tally.bullish_signals += votes;
            } else {
                tally.bearish_signals += votes;
            }
            tally.weights.insert(id.as_str(), votes as f64);
        }

        tally.bias = if tally.bullish_signals > tally.bearish_signals + 1 {
            Direction::Bullish
        } else if tally.bearish_signals > tally.bullish_signals + 1 {
            Direction::Bearish
        } else {
            Direction::Neutral
        };

        let fired: Vec<f64> = set
            .signals
            .iter()
            .filter(|s| s.detected)
            .filter_map(smc_confidence)
            .collect();
        tally.confidence_score = if fired.is_empty() {
            SMC_DEFAULT_CONFIDENCE
        } else {
            round_to(fired.iter().sum::<f64>() / fired.len() as f64, 1)
        };
        tally
    }
}

fn smc_bias(set: &SignalSet, min_confidence: f64) -> Prediction {
    let tally = BiasTally::from_signals(set);
    let breakdown = SignalBreakdown {
        up: tally.bullish_signals,
        down: tally.bearish_signals,
        total: tally.bullish_signals + tally.bearish_signals,
        total_weight: tally.weights.values().sum(),
        weights: tally.weights.clone(),
    };
    trace!(
        bullish = tally.bullish_signals,
        bearish = tally.bearish_signals,
        "smc votes"
    );
    Prediction::new(
        Aggregator::SmcBias,
        set,
        PredictedDirection::from_direction(tally.bias),
        tally.confidence_score,
        min_confidence,
        breakdown,
    )
}

// ============================================================
// MULTI-FACTOR
// ============================================================

/// Weight per confluence input. Not normalized.
pub const MULTI_FACTOR_WEIGHTS: &[(DetectorId, f64)] = &[
    (DetectorId::HTF_BIAS, 0.30),
    (DetectorId::BREAK_OF_STRUCTURE, 0.25),
    (DetectorId::CHANGE_OF_CHARACTER, 0.20),
    (DetectorId::FAIR_VALUE_GAP, 0.15),
    (DetectorId::SUPPORT_RESISTANCE, 0.15),
    (DetectorId::SUPPLY_DEMAND, 0.10),
    (DetectorId::ORDER_BLOCKS, 0.12),
    (DetectorId::ICT_LIQUIDITY_GRAB, 0.10),
    (DetectorId::SMC_STRUCTURE_BREAK, 0.08),
    (DetectorId::SMART_MONEY_DIVERGENCE, 0.07),
    (DetectorId::QMLR_CONFLUENCE, 0.08),
    (DetectorId::TRADITIONAL, 0.05),
    (DetectorId::LTF_STRUCTURE, 0.05),
];

fn multi_factor(set: &SignalSet, min_confidence: f64) -> Prediction {
    let mut breakdown = SignalBreakdown::default();
    for &(id, weight) in MULTI_FACTOR_WEIGHTS {
        let Some(signal) = set.get(id).filter(|s| s.is_directional()) else {
            continue;
        };
        if signal.direction.is_bullish() {
            breakdown.up += 1;
        } else {
            breakdown.down += 1;
        }
        let contribution = weight * signal.strength;
        breakdown.total_weight += contribution;
        breakdown.weights.insert(id.as_str(), contribution);
    }
    breakdown.total = breakdown.up + breakdown.down;

    if breakdown.total == 0 {
        // Basic trend fallback
        let direction = match set.recent_change {
            Some(change) if change <= 0.0 => PredictedDirection::Down,
            _ => PredictedDirection::Up,
        };
        trace!(?direction, "no directional signals, trend fallback");
        return Prediction::new(
            Aggregator::MultiFactor,
            set,
            direction,
            BASE_CONFIDENCE,
            min_confidence,
            breakdown,
        );
    }

    let htf = set.get(DetectorId::HTF_BIAS).filter(|s| s.is_directional());
    let direction = match breakdown.up.cmp(&breakdown.down) {
        std::cmp::Ordering::Greater => PredictedDirection::Up,
        std::cmp::Ordering::Less => PredictedDirection::Down,
        std::cmp::Ordering::Equal => match htf.map(|s| s.direction) {
            Some(Direction::Bearish) => PredictedDirection::Down,
            _ => PredictedDirection::Up,
        },
    };

    let majority = breakdown.up.max(breakdown.down) as f64;
    let consensus_bonus = (majority / breakdown.total as f64 - 0.5) * 40.0;
    let weight_bonus = (breakdown.total_weight * 30.0).min(20.0);
    let factors = ConfluenceFactors::from_signals(set);
    let mtf_bonus = if factors.htf_ltf_alignment { 5.0 } else { 0.0 };
    let structure_bonus = if factors.structure_signals { 5.0 } else { 0.0 };

    let confidence = round_to(
        (BASE_CONFIDENCE + consensus_bonus + weight_bonus + mtf_bonus + structure_bonus)
            .clamp(BASE_CONFIDENCE, MAX_CONFIDENCE),
        1,
    );
    Prediction::new(
        Aggregator::MultiFactor,
        set,
        direction,
        confidence,
        min_confidence,
        breakdown,
    )
}

// ============================================================
// SMC REPORT
// ============================================================

/// Likelihood that the current move continues
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendContinuation {
    pub likely: bool,
    #[serde(serialize_with = "finite")]
    pub probability: f64,
    pub factors: Vec<&'static str>,
    pub grade: Grade,
}

impl TrendContinuation {
    pub fn from_signals(set: &SignalSet) -> Self {
        let count = |id| set.get(id).map(|s| s.detail.count()).unwrap_or(0);
        let mut factors = Vec::new();

        if set
            .get(DetectorId::MARKET_STRUCTURE_SHIFT)
            .is_some_and(|s| s.detected && s.grade == Some(Grade::High))
        {
            factors.push("STRONG_MSS");
        }
        if count(DetectorId::ORDER_BLOCKS) >= 2 {
            factors.push("MULTIPLE_ORDER_BLOCKS");
        }
        if count(DetectorId::FAIR_VALUE_GAP) >= 2 {
            factors.push("MULTIPLE_FVGS");
        }
        if set.is_detected(DetectorId::LIQUIDITY_SWEEP)
            || set.is_detected(DetectorId::LIQUIDITY_GRAB)
        {
            factors.push("LIQUIDITY_ACTIVITY");
        }

        let probability = (factors.len() as f64 * 20.0).min(90.0);
        Self {
            likely: probability >= 60.0,
            probability,
            factors,
            grade: if probability >= 80.0 {
                Grade::High
            } else if probability >= 60.0 {
                Grade::Medium
            } else {
                Grade::Low
            },
        }
    }
}

/// Weighted vote for the next move
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextDirection {
    pub direction: PredictedDirection,
    #[serde(serialize_with = "finite")]
    pub confidence: f64,
    pub bullish_score: usize,
    pub bearish_score: usize,
}

const NEXT_MOVE_VOTES: &[(DetectorId, usize)] = &[
    (DetectorId::MARKET_STRUCTURE_SHIFT, 2),
    (DetectorId::QUASIMODO, 2),
    (DetectorId::CHANGE_OF_CHARACTER, 2),
    (DetectorId::ORDER_BLOCKS, 1),
    (DetectorId::FAIR_VALUE_GAP, 1),
    (DetectorId::LIQUIDITY_SWEEP, 1),
    (DetectorId::LIQUIDITY_GRAB, 1),
    (DetectorId::SMART_MONEY_DIVERGENCE, 1),
];

impl NextDirection {
    pub fn from_signals(set: &SignalSet) -> Self {
        let (mut bull, mut bear) = (0, 0);
        for &(id, votes) in NEXT_MOVE_VOTES {
            match set.get(id).filter(|s| s.is_directional()).map(|s| s.direction) {
                Some(Direction::Bullish) => bull += votes,
                Some(Direction::Bearish) => bear += votes,
                _ => {},
            }
        }

        let top = bull.max(bear);
        if top == 0 {
            return Self {
                direction: PredictedDirection::Sideways,
                confidence: 50.0,
                bullish_score: 0,
                bearish_score: 0,
            };
        }
        Self {
            direction: if bull >= bear {
                PredictedDirection::Up
            } else {
                PredictedDirection::Down
            },
            confidence: round_to((top as f64 / (bull + bear) as f64 * 100.0).min(95.0), 1),
            bullish_score: bull,
            bearish_score: bear,
        }
    }
}

/// Price level worth watching
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyLevel {
    #[serde(serialize_with = "finite")]
    pub price: f64,
    pub kind: &'static str,
    pub grade: Grade,
}

/// Levels kept per kind
const LEVELS_PER_KIND: usize = 2;
/// Levels kept overall
const MAX_KEY_LEVELS: usize = 8;

fn last_n<T>(items: &[T]) -> &[T] {
    &items[items.len().saturating_sub(LEVELS_PER_KIND)..]
}

/// Support/resistance, order block midpoints and gap midpoints, by price.
pub fn key_levels(set: &SignalSet) -> Vec<KeyLevel> {
    let mut levels = Vec::new();
    let detail = |id| set.get(id).map(|s| &s.detail);

    if let Some(Detail::Levels {
        supports,
        resistances,
        ..
    }) = detail(DetectorId::SUPPORT_RESISTANCE)
    {
        for (list, kind) in [(supports, "SUPPORT"), (resistances, "RESISTANCE")] {
            levels.extend(last_n(&list[..]).iter().map(|l| KeyLevel {
                price: l.price,
                kind,
                grade: l.grade,
            }));
        }
    }

    if let Some(Detail::OrderBlocks {
        bullish, bearish, ..
    }) = detail(DetectorId::ORDER_BLOCKS)
    {
        for (list, kind) in [(bullish, "BULLISH_OB"), (bearish, "BEARISH_OB")] {
            levels.extend(last_n(&list[..]).iter().map(|ob| KeyLevel {
                price: ob.midpoint(),
                kind,
                grade: Grade::High,
            }));
        }
    }

    if let Some(Detail::Gaps {
        bullish, bearish, ..
    }) = detail(DetectorId::FAIR_VALUE_GAP)
    {
        for (list, kind) in [(bullish, "BULLISH_FVG"), (bearish, "BEARISH_FVG")] {
            levels.extend(last_n(&list[..]).iter().map(|g| KeyLevel {
                price: g.midpoint(),
                kind,
                grade: Grade::Medium,
            }));
        }
    }

    levels.retain(|l| l.price.is_finite());
    levels.sort_by(|a, b| a.price.total_cmp(&b.price));
    let excess = levels.len().saturating_sub(MAX_KEY_LEVELS);
    levels.drain(..excess);
    levels
}

/// Both strategies, their blended verdict and the smart-money reads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmcReport {
    pub smc: Prediction,
    pub multi_factor: Prediction,
    pub tally: BiasTally,
    pub final_direction: PredictedDirection,
    #[serde(serialize_with = "finite")]
    pub final_confidence: f64,
    pub trend_continuation: TrendContinuation,
    pub next_direction: NextDirection,
    pub key_levels: Vec<KeyLevel>,
}

impl SmcReport {
    pub fn from_signals(set: &SignalSet, min_confidence: f64) -> Self {
        let smc = smc_bias(set, min_confidence);
        let multi = multi_factor(set, min_confidence);
        let (final_direction, final_confidence) = blend(&smc, &multi);
        Self {
            tally: BiasTally::from_signals(set),
            trend_continuation: TrendContinuation::from_signals(set),
            next_direction: NextDirection::from_signals(set),
            key_levels: key_levels(set),
            smc,
            multi_factor: multi,
            final_direction,
            final_confidence,
        }
    }
}

/// 70/30 blend of the SMC and multi-factor confidences.
///
/// Direction: agreement wins, otherwise whichever side alone reaches 75,
/// otherwise unknown.
pub fn blend(smc: &Prediction, multi: &Prediction) -> (PredictedDirection, f64) {
    let confidence = round_to(
        (0.7 * smc.confidence + 0.3 * multi.confidence).clamp(5.0, 95.0),
        1,
    );
    let direction = if smc.direction.is_directional() && smc.direction == multi.direction {
        smc.direction
    } else if smc.confidence >= DECISIVE_CONFIDENCE && smc.direction.is_directional() {
        smc.direction
    } else if multi.confidence >= DECISIVE_CONFIDENCE && multi.direction.is_directional() {
        multi.direction
    } else {
        PredictedDirection::Unknown
    };
    (direction, confidence)
}

// ============================================================
// TESTS
// ============================================================
