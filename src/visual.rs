//! Visual analyzer boundary and the final recommendation.
//!
//! A chart-image reading only ever confirms or contradicts a prediction. It
//! never changes the confidence.

use serde::Serialize;

use crate::{
    aggregate::{PredictedDirection, Prediction},
    signal::finite,
    Result,
};

/// Confidence reported by image readings
pub const VISUAL_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisualTrend {
    Bullish,
    Bearish,
    Sideways,
    #[default]
    Unknown,
}

impl VisualTrend {
    /// Bullish confirms up, bearish confirms down, sideways confirms sideways
    pub fn matches(self, direction: PredictedDirection) -> bool {
        matches!(
            (self, direction),
            (VisualTrend::Bullish, PredictedDirection::Up)
                | (VisualTrend::Bearish, PredictedDirection::Down)
                | (VisualTrend::Sideways, PredictedDirection::Sideways)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualReading {
    pub trend: VisualTrend,
    pub pattern_type: String,
    pub quality: String,
    #[serde(serialize_with = "finite")]
    pub confidence: f64,
}

impl Default for VisualReading {
    fn default() -> Self {
        Self {
            trend: VisualTrend::Unknown,
            pattern_type: "UNKNOWN".to_string(),
            quality: "LOW".to_string(),
            confidence: VISUAL_CONFIDENCE,
        }
    }
}

/// Reads trend information from a rendered chart
pub trait VisualAnalyzer: Send + Sync {
    fn analyze_image(&self, image: &[u8]) -> Result<VisualReading>;
}

impl Prediction {
    /// Record whether a visual reading agrees with the predicted direction
    pub fn with_visual(mut self, reading: &VisualReading) -> Self {
        self.visual_confirmation = Some(reading.trend.matches(self.direction));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationBasis {
    RealPriceData,
    InsufficientConfidence,
}

/// What to do with a prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    /// `UP`, `DOWN` or `WAIT`
    pub action: &'static str,
    #[serde(serialize_with = "finite")]
    pub confidence: f64,
    pub basis: RecommendationBasis,
    /// `HIGH`, `MEDIUM` or `LOW`
    pub strength: &'static str,
    pub visual_insights: Option<VisualReading>,
}

impl Recommendation {
    pub fn from_prediction(prediction: &Prediction, visual: Option<&VisualReading>) -> Self {
        let actionable = prediction.meets_threshold && prediction.direction.is_directional();
        let visual_insights = visual.cloned();

        if !actionable {
            return Self {
                action: "WAIT",
                confidence: 50.0,
                basis: RecommendationBasis::InsufficientConfidence,
                strength: "LOW",
                visual_insights,
            };
        }
        Self {
            action: prediction.direction.label(),
            confidence: prediction.confidence,
            basis: RecommendationBasis::RealPriceData,
            strength: if prediction.confidence >= 80.0 {
                "HIGH"
            } else {
                "MEDIUM"
            },
            visual_insights,
        }
    }
}
