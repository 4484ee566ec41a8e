//! Entry recommendation derived from a [`Prediction`].

use serde::Serialize;

use crate::{
    aggregate::{PredictedDirection, Prediction},
    signal::{finite, finite_opt, round_to},
    CandleSeries,
};

/// Support/resistance clearance that lets the current price be the entry
const LEVEL_CLEARANCE: f64 = 0.001;
/// Offset applied to the current price otherwise
const ENTRY_OFFSET: f64 = 0.0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySignal {
    EnterNow,
    Prepare,
    GetReady,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timing {
    Immediate,
    #[serde(rename = "NEXT_30_SECONDS")]
    Next30Seconds,
    #[serde(rename = "NEXT_1_2_MINUTES")]
    Next1To2Minutes,
    WaitForBetterEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Trade duration and its risk for a confidence value.
///
/// At or above 90 ⇒ 10 minutes, at or above 80 ⇒ 5 minutes, else 1 minute.
pub fn duration_for(confidence: f64) -> (u32, RiskLevel) {
    if confidence >= 90.0 {
        (10, RiskLevel::Low)
    } else if confidence >= 80.0 {
        (5, RiskLevel::Medium)
    } else {
        (1, RiskLevel::High)
    }
}

/// Timing bucket for a price distance in percent
pub fn timing_for(distance_pct: f64) -> (EntrySignal, Timing) {
    if distance_pct < 0.05 {
        (EntrySignal::EnterNow, Timing::Immediate)
    } else if distance_pct < 0.1 {
        (EntrySignal::Prepare, Timing::Next30Seconds)
    } else if distance_pct < 0.2 {
        (EntrySignal::GetReady, Timing::Next1To2Minutes)
    } else {
        (EntrySignal::Wait, Timing::WaitForBetterEntry)
    }
}

/// Actionable entry for a prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryRecommendation {
    pub entry_signal: EntrySignal,
    pub direction: Option<PredictedDirection>,
    pub duration_minutes: Option<u32>,
    #[serde(serialize_with = "finite_opt")]
    pub entry_price: Option<f64>,
    #[serde(serialize_with = "finite")]
    pub current_price: f64,
    #[serde(serialize_with = "finite")]
    pub confidence: f64,
    pub risk_level: Option<RiskLevel>,
    pub timing: Timing,
    #[serde(serialize_with = "finite_opt")]
    pub price_distance_pct: Option<f64>,
    /// Number of true confluence factors
    pub confluence_score: usize,
    pub action: String,
    pub summary: String,
}

impl EntryRecommendation {
    /// Build from a prediction and the series it was made on.
    ///
    /// The latest close of `series` is the current price; the prediction's
    /// own price is used when the series is empty.
    pub fn from_prediction(prediction: &Prediction, series: &CandleSeries) -> Self {
        let price = series
            .current_price()
            .unwrap_or(prediction.current_price);
        let confluence_score = prediction.confluence_factors.count();
        let summary = format!(
            "{} confluence factors, {} signals",
            confluence_score, prediction.signal_breakdown.total
        );

        if !prediction.meets_threshold || !prediction.direction.is_directional() {
            return Self {
                entry_signal: EntrySignal::Wait,
                direction: None,
                duration_minutes: None,
                entry_price: None,
                current_price: price,
                confidence: prediction.confidence,
                risk_level: None,
                timing: Timing::WaitForBetterEntry,
                price_distance_pct: None,
                confluence_score,
                action: "Low confidence - wait for better setup".to_string(),
                summary,
            };
        }

        let direction = prediction.direction;
        let (duration, risk) = duration_for(prediction.confidence);
        let entry = entry_price(direction, price, prediction);
        let distance = if price != 0.0 {
            (price - entry).abs() / price * 100.0
        } else {
            0.0
        };
        let (entry_signal, timing) = timing_for(distance);

        let action = if entry_signal == EntrySignal::Wait {
            format!("Monitor for {} setup", direction.label())
        } else {
            format!("TRADE {} for {} MINUTES", direction.label(), duration)
        };

        Self {
            entry_signal,
            direction: Some(direction),
            duration_minutes: Some(duration),
            entry_price: Some(round_to(entry, 5)),
            current_price: price,
            confidence: prediction.confidence,
            risk_level: Some(risk),
            timing,
            price_distance_pct: Some(round_to(distance, 3)),
            confluence_score,
            action,
            summary,
        }
    }
}

fn entry_price(direction: PredictedDirection, price: f64, prediction: &Prediction) -> f64 {
    match direction {
        PredictedDirection::Up => match prediction.nearest_support() {
            Some(support) if price > support * (1.0 + LEVEL_CLEARANCE) => price,
            _ => price * (1.0 + ENTRY_OFFSET),
        },
        _ => match prediction.nearest_resistance() {
            Some(resistance) if price < resistance * (1.0 - LEVEL_CLEARANCE) => price,
            _ => price * (1.0 - ENTRY_OFFSET),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detectors::PriceLevel, signal::Detail, Aggregator, Candle, DetectorId, Direction, Signal,
        SignalSet,
    };

    fn series(price: f64) -> CandleSeries {
        CandleSeries::new(vec![Candle::new(0, price, price + 0.5, price - 0.5, price)]).unwrap()
    }

    fn levels(support: Option<f64>, resistance: Option<f64>) -> Signal {
        Signal::none(DetectorId::SUPPORT_RESISTANCE).with_detail(Detail::Levels {
            supports: Vec::<PriceLevel>::new(),
            resistances: Vec::new(),
            nearest_support: support,
            nearest_resistance: resistance,
            support_distance_pct: f64::INFINITY,
            resistance_distance_pct: f64::INFINITY,
        })
    }

    fn prediction(direction: Direction, extra: Vec<Signal>) -> Prediction {
        let mut signals = vec![Signal::new(DetectorId::HTF_BIAS, direction, 1.0)];
        signals.extend(extra);
        let set = SignalSet {
            signals,
            current_price: 100.0,
            recent_change: None,
        };
        Aggregator::MultiFactor.aggregate(&set, 70.0)
    }

    #[test]
    fn test_duration_boundaries() {
        assert_eq!(duration_for(89.9), (5, RiskLevel::Medium));
        assert_eq!(duration_for(90.0), (10, RiskLevel::Low));
        assert_eq!(duration_for(79.9), (1, RiskLevel::High));
        assert_eq!(duration_for(80.0), (5, RiskLevel::Medium));
    }

    #[test]
    fn test_timing_buckets() {
        assert_eq!(timing_for(0.0).0, EntrySignal::EnterNow);
        assert_eq!(timing_for(0.07).1, Timing::Next30Seconds);
        assert_eq!(timing_for(0.15).0, EntrySignal::GetReady);
        assert_eq!(timing_for(0.2).0, EntrySignal::Wait);
    }

    #[test]
    fn test_up_entry_above_support_uses_price() {
        let p = prediction(Direction::Bullish, vec![levels(Some(99.0), None)]);
        let rec = EntryRecommendation::from_prediction(&p, &series(100.0));
        assert_eq!(rec.entry_price, Some(100.0));
        assert_eq!(rec.entry_signal, EntrySignal::EnterNow);
        assert_eq!(rec.timing, Timing::Immediate);
        assert_eq!(rec.price_distance_pct, Some(0.0));
    }

    #[test]
    fn test_up_entry_without_support_is_offset() {
        let p = prediction(Direction::Bullish, vec![]);
        let rec = EntryRecommendation::from_prediction(&p, &series(100.0));
        assert_eq!(rec.entry_price, Some(100.02));
        assert_eq!(rec.price_distance_pct, Some(0.02));
        assert_eq!(rec.direction, Some(PredictedDirection::Up));
        assert!(rec.action.starts_with("TRADE UP for"));
    }

    #[test]
    fn test_down_entry_near_resistance_is_offset() {
        let p = prediction(Direction::Bearish, vec![levels(None, Some(100.05))]);
        let rec = EntryRecommendation::from_prediction(&p, &series(100.0));
        assert_eq!(rec.entry_price, Some(99.98));
        assert_eq!(rec.direction, Some(PredictedDirection::Down));
    }

    #[test]
    fn test_low_confidence_waits() {
        let set = SignalSet::default();
        let p = Aggregator::SmcBias.aggregate(&set, 70.0);
        let rec = EntryRecommendation::from_prediction(&p, &series(100.0));
        assert_eq!(rec.entry_signal, EntrySignal::Wait);
        assert_eq!(rec.direction, None);
        assert_eq!(rec.duration_minutes, None);
        assert_eq!(rec.action, "Low confidence - wait for better setup");
    }

    #[test]
    fn test_serializes_timing_names() {
        let p = prediction(Direction::Bullish, vec![]);
        let rec = EntryRecommendation::from_prediction(&p, &series(100.0));
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["entry_signal"], "ENTER_NOW");
        assert_eq!(json["timing"], "IMMEDIATE");
        assert_eq!(timing_for(0.15).1, Timing::Next1To2Minutes);
        let next = serde_json::to_value(Timing::Next1To2Minutes).unwrap();
        assert_eq!(next, "NEXT_1_2_MINUTES");
        let soon = serde_json::to_value(Timing::Next30Seconds).unwrap();
        assert_eq!(soon, "NEXT_30_SECONDS");
    }
}
