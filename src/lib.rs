//! # smc-confluence
//!
//! Market-structure pattern detection and confluence scoring for OHLCV candles.
//!
//! A battery of independent detectors (market structure shift, break of
//! structure, fair value gaps, order blocks, liquidity sweeps, ...) runs over a
//! [`CandleSeries`]; their [`Signal`]s are merged by an [`Aggregator`] into a
//! [`Prediction`], which [`EntryRecommendation`] turns into an actionable entry.
//!
//! ## Quick Start
//!
//! ```rust
//! use smc_confluence::prelude::*;
//!
//! let candles: Vec<Candle> = (0..60)
//!     .map(|i| {
//!         let c = 100.0 + i as f64;
//!         Candle::new(i * 3600, c - 0.4, c + 0.3, c - 0.6, c)
//!     })
//!     .collect();
//! let series = CandleSeries::new(candles).unwrap();
//!
//! let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
//! let prediction = analyzer.analyze(&series, None).unwrap();
//! assert!(prediction.confidence >= 0.0 && prediction.confidence <= 100.0);
//! ```

pub mod aggregate;
pub mod detectors;
pub mod entry;
pub mod feed;
pub mod indicators;
pub mod params;
pub mod series;
pub mod signal;
pub mod visual;

pub mod prelude {
    pub use crate::{
        // Aggregation
        aggregate::{
            Aggregator, ConfluenceFactors, KeyLevel, NextDirection, PredictedDirection,
            Prediction, SignalBreakdown, SmcReport, TrendContinuation,
        },
        // Parallel
        analyze_parallel,
        // Detectors
        detectors::*,
        // Entry
        entry::{EntryRecommendation, EntrySignal, RiskLevel, Timing},
        // Feed
        feed::{
            fetch_timeframes, Clock, FeedChain, FeedError, ManualClock, PriceCache, PriceFeed,
            StaticFeed, SystemClock, Timeframe,
        },
        // Parameters
        params::{get_factor, get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Series
        series::{structure_points, swing_points, Candle, CandleSeries, SwingKind, SwingPoint, Swings},
        // Signals
        signal::{Detail, Grade, Signal, SignalStatus},
        // Visual
        visual::{Recommendation, VisualAnalyzer, VisualReading, VisualTrend},
        // Core
        AnalysisContext,
        AnalysisError,
        Analyzer,
        AnalyzerBuilder,
        AnalyzerConfig,
        BuiltinDetector,
        ContextProvider,
        DefaultContextProvider,
        Detector,
        DetectorId,
        Direction,
        OHLCVExt,
        Period,
        Ratio,
        Result,
        SignalSet,
        StrictSwingProvider,
        SymbolError,
        SymbolPrediction,
        OHLCV,
    };
}

use std::collections::BTreeMap;

use tracing::debug;

pub use aggregate::{Aggregator, Prediction};
pub use entry::EntryRecommendation;
pub use series::{Candle, CandleSeries};
pub use signal::Signal;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while building or running an analysis
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} candles, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("No {timeframe} data for {symbol}")]
    NoData {
        symbol: String,
        timeframe: feed::Timeframe,
    },

    #[error(transparent)]
    Feed(#[from] feed::FeedError),

    #[error("Detector {id} failed: {reason}")]
    Detector { id: &'static str, reason: String },
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(AnalysisError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(AnalysisError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Candle count (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(AnalysisError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Body as ratio of range. Returns None if range ≈ 0
    #[inline]
    fn body_ratio(&self) -> Option<f64> {
        let range = self.range();
        (range > f64::EPSILON).then(|| self.body() / range)
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close(), self.volume()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.high() < self.open().max(self.close()).max(self.low()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "high below open, close or low",
            });
        }
        if self.low() > self.open().min(self.close()) {
            return Err(AnalysisError::InvalidCandle {
                index: 0,
                reason: "low above open or close",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// DETECTOR IDS AND DIRECTION
// ============================================================

/// Unique identifier for a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct DetectorId(pub &'static str);

impl DetectorId {
    pub const MARKET_STRUCTURE_SHIFT: Self = Self("market_structure_shift");
    pub const BREAK_OF_STRUCTURE: Self = Self("break_of_structure");
    pub const CHANGE_OF_CHARACTER: Self = Self("change_of_character");
    pub const ORDER_BLOCKS: Self = Self("order_blocks");
    pub const QUASIMODO: Self = Self("quasimodo");
    pub const SUPPORT_RESISTANCE: Self = Self("support_resistance");
    pub const FAIR_VALUE_GAP: Self = Self("fair_value_gap");
    pub const INVERSE_FAIR_VALUE_GAP: Self = Self("inverse_fair_value_gap");
    pub const LIQUIDITY_ZONES: Self = Self("liquidity_zones");
    pub const LIQUIDITY_SWEEP: Self = Self("liquidity_sweep");
    pub const LIQUIDITY_GRAB: Self = Self("liquidity_grab");
    pub const SMART_MONEY_DIVERGENCE: Self = Self("smart_money_divergence");
    pub const SUPPLY_DEMAND: Self = Self("supply_demand");
    pub const ICT_LIQUIDITY_GRAB: Self = Self("ict_liquidity_grab");
    pub const SMC_STRUCTURE_BREAK: Self = Self("smc_structure_break");
    pub const QMLR_CONFLUENCE: Self = Self("qmlr_confluence");
    pub const HTF_BIAS: Self = Self("htf_bias");
    pub const LTF_STRUCTURE: Self = Self("ltf_structure");
    pub const TRADITIONAL: Self = Self("traditional");

    #[inline]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for DetectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Direction/bias of a signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    #[inline]
    pub fn is_neutral(self) -> bool {
        matches!(self, Direction::Neutral)
    }

    /// Bullish and bearish swap, neutral stays neutral
    #[inline]
    pub fn inverse(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
            Direction::Neutral => Direction::Neutral,
        }
    }

    /// Direction with the larger count, neutral on a tie
    #[inline]
    pub fn from_counts(bullish: usize, bearish: usize) -> Self {
        match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Direction::Bullish,
            std::cmp::Ordering::Less => Direction::Bearish,
            std::cmp::Ordering::Equal => Direction::Neutral,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Neutral => "NEUTRAL",
            Direction::Bearish => "BEARISH",
        }
    }
}

// ============================================================
// ANALYSIS CONTEXT
// ============================================================

/// Read-only inputs shared by every detector in one analysis call.
///
/// Swing and structure points are computed once here instead of once per
/// detector.
#[derive(Debug, Clone)]
pub struct AnalysisContext<'a> {
    /// Primary (1h) series
    pub primary: &'a CandleSeries,
    /// Higher-timeframe (4h) series; the primary series when none was supplied
    pub higher: &'a CandleSeries,
    pub swing_window: usize,
    /// Strict swing points of the primary series
    pub swings: series::Swings,
    /// Structure points of the primary series
    pub structure: series::Swings,
    /// Structure points of the higher-timeframe series
    pub higher_structure: series::Swings,
}

impl<'a> AnalysisContext<'a> {
    /// Context over a single series with default structure points
    pub fn single(series: &'a CandleSeries, swing_window: usize) -> Self {
        DefaultContextProvider.build(series, series, swing_window)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    #[inline]
    pub fn candles(&self) -> &'a [Candle] {
        self.primary.candles()
    }

    /// Latest close of the primary series (0.0 when empty)
    #[inline]
    pub fn price(&self) -> f64 {
        self.primary.current_price().unwrap_or(0.0)
    }
}

/// Builds the [`AnalysisContext`], deciding which points count as structure
pub trait ContextProvider: Send + Sync {
    fn build<'a>(
        &self,
        primary: &'a CandleSeries,
        higher: &'a CandleSeries,
        swing_window: usize,
    ) -> AnalysisContext<'a>;
}

/// Structure points fall back to block pivots when strict swings are too few
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextProvider;

impl ContextProvider for DefaultContextProvider {
    fn build<'a>(
        &self,
        primary: &'a CandleSeries,
        higher: &'a CandleSeries,
        swing_window: usize,
    ) -> AnalysisContext<'a> {
        AnalysisContext {
            primary,
            higher,
            swing_window,
            swings: series::swing_points(primary, swing_window),
            structure: series::structure_points(primary, swing_window),
            higher_structure: series::structure_points(higher, swing_window),
        }
    }
}

/// Structure is strict swing points only
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictSwingProvider;

impl ContextProvider for StrictSwingProvider {
    fn build<'a>(
        &self,
        primary: &'a CandleSeries,
        higher: &'a CandleSeries,
        swing_window: usize,
    ) -> AnalysisContext<'a> {
        let swings = series::swing_points(primary, swing_window);
        AnalysisContext {
            primary,
            higher,
            swing_window,
            structure: swings.clone(),
            swings,
            higher_structure: series::swing_points(higher, swing_window),
        }
    }
}

// ============================================================
// DETECTOR TRAIT
// ============================================================

/// A market-structure detector.
///
/// `detect` is a pure function of the context. Implementations must return an
/// insufficient-data signal (see [`Signal::insufficient`]) rather than an
/// error when the series is shorter than [`Detector::min_candles`].
pub trait Detector: Send + Sync {
    fn id(&self) -> DetectorId;
    fn min_candles(&self) -> usize;
    fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl Detector for BuiltinDetector {
            #[inline]
            fn id(&self) -> DetectorId {
                match self {
                    $(Self::$variant(d) => Detector::id(d)),*
                }
            }

            #[inline]
            fn min_candles(&self) -> usize {
                match self {
                    $(Self::$variant(d) => Detector::min_candles(d)),*
                }
            }

            #[inline]
            fn detect(&self, ctx: &AnalysisContext<'_>) -> Result<Signal> {
                match self {
                    $(Self::$variant(d) => Detector::detect(d, ctx)),*
                }
            }

            fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => Detector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Structure
    MarketStructureShift(MarketStructureShiftDetector),
    BreakOfStructure(BreakOfStructureDetector),
    ChangeOfCharacter(ChangeOfCharacterDetector),
    SmcStructureBreak(SmcStructureDetector),
    IctLiquidityGrab(IctReversalDetector),

    // Zones and levels
    OrderBlocks(OrderBlockDetector),
    SupportResistance(SupportResistanceDetector),
    SupplyDemand(SupplyDemandDetector),
    Quasimodo(QuasimodoDetector),

    // Imbalance
    FairValueGap(FairValueGapDetector),
    InverseFairValueGap(InverseFairValueGapDetector),

    // Liquidity
    LiquidityZones(LiquidityZoneDetector),
    LiquiditySweep(LiquiditySweepDetector),
    LiquidityGrab(LiquidityGrabDetector),
    SmartMoneyDivergence(SmartMoneyDivergenceDetector),

    // Confluence inputs
    HigherTimeframeBias(HigherTimeframeBiasDetector),
    LowerTimeframeStructure(LowerTimeframeStructureDetector),
    QmlrConfluence(QmlrConfluenceDetector),
    Traditional(TraditionalConfirmationDetector),
}

// ============================================================
// SIGNAL SET
// ============================================================

/// Every signal produced by one analysis call
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    pub signals: Vec<Signal>,
    /// Latest close of the primary series
    pub current_price: f64,
    /// Relative close change over the last five candles, if there are five
    pub recent_change: Option<f64>,
}

impl SignalSet {
    pub fn new(signals: Vec<Signal>, series: &CandleSeries) -> Self {
        let current_price = series.current_price().unwrap_or(0.0);
        let recent_change = series
            .close_back(4)
            .filter(|prior| *prior != 0.0)
            .map(|prior| (current_price - prior) / prior);
        Self {
            signals,
            current_price,
            recent_change,
        }
    }

    /// First signal with the given id
    pub fn get(&self, id: DetectorId) -> Option<&Signal> {
        self.signals.iter().find(|s| s.id == id)
    }

    /// Direction of a signal, neutral when absent
    pub fn direction(&self, id: DetectorId) -> Direction {
        self.get(id).map(|s| s.direction).unwrap_or_default()
    }

    pub fn is_detected(&self, id: DetectorId) -> bool {
        self.get(id).is_some_and(|s| s.detected)
    }

    /// Signals keyed by detector id
    pub fn breakdown(&self) -> BTreeMap<&'static str, Signal> {
        let mut map = BTreeMap::new();
        for s in &self.signals {
            map.entry(s.id.as_str()).or_insert_with(|| s.clone());
        }
        map
    }
}

// ============================================================
// ANALYZER
// ============================================================

/// Analyzer configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Confidence at or above which a prediction is actionable
    pub min_confidence: f64,
    pub swing_window: Period,
    pub aggregator: Aggregator,
    /// Candles requested per timeframe from a price feed
    pub feed_limit: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 70.0,
            swing_window: Period::new_const(series::DEFAULT_SWING_WINDOW),
            aggregator: Aggregator::default(),
            feed_limit: 200,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.min_confidence) {
            return Err(AnalysisError::OutOfRange {
                field: "min_confidence",
                value: self.min_confidence,
                min: 0.0,
                max: 100.0,
            });
        }
        if self.feed_limit == 0 {
            return Err(AnalysisError::InvalidConfig(
                "feed_limit must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main analysis engine
pub struct Analyzer<C: ContextProvider = DefaultContextProvider> {
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn Detector>>,
    context_provider: C,
    config: AnalyzerConfig,
}

impl<C: ContextProvider> Analyzer<C> {
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Number of registered detectors
    pub fn detector_count(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    // ===========================================
    // LOW-LEVEL: Context and signals
    // ===========================================

    /// Precompute the shared context. `higher` defaults to `primary`.
    pub fn context<'a>(
        &self,
        primary: &'a CandleSeries,
        higher: Option<&'a CandleSeries>,
    ) -> AnalysisContext<'a> {
        self.context_provider.build(
            primary,
            higher.unwrap_or(primary),
            self.config.swing_window.get(),
        )
    }

    /// Run every registered detector, each behind its own failure boundary.
    pub fn signals(&self, ctx: &AnalysisContext<'_>) -> SignalSet {
        let mut signals = Vec::with_capacity(self.detector_count());
        signals.extend(self.builtin.iter().map(|d| evaluate(d, ctx)));
        signals.extend(self.custom.iter().map(|d| evaluate(d.as_ref(), ctx)));
        SignalSet::new(signals, ctx.primary)
    }

    // ===========================================
    // HIGH-LEVEL: Predictions
    // ===========================================

    /// Analyze with the configured aggregator.
    pub fn analyze(
        &self,
        primary: &CandleSeries,
        higher: Option<&CandleSeries>,
    ) -> Result<Prediction> {
        self.analyze_with(self.config.aggregator, primary, higher)
    }

    /// Analyze with an explicit aggregation strategy.
    pub fn analyze_with(
        &self,
        aggregator: Aggregator,
        primary: &CandleSeries,
        higher: Option<&CandleSeries>,
    ) -> Result<Prediction> {
        ensure_not_empty(primary)?;
        let ctx = self.context(primary, higher);
        let set = self.signals(&ctx);
        let prediction = aggregator.aggregate(&set, self.config.min_confidence);
        debug!(
            strategy = ?aggregator,
            direction = ?prediction.direction,
            confidence = prediction.confidence,
            "analysis complete"
        );
        Ok(prediction)
    }

    /// Both aggregation strategies plus the SMC continuation/next-move reads.
    pub fn report(
        &self,
        primary: &CandleSeries,
        higher: Option<&CandleSeries>,
    ) -> Result<aggregate::SmcReport> {
        ensure_not_empty(primary)?;
        let ctx = self.context(primary, higher);
        let set = self.signals(&ctx);
        Ok(aggregate::SmcReport::from_signals(
            &set,
            self.config.min_confidence,
        ))
    }

    /// Prediction followed by an entry recommendation.
    pub fn entry_signal(
        &self,
        primary: &CandleSeries,
        higher: Option<&CandleSeries>,
    ) -> Result<EntryRecommendation> {
        let prediction = self.analyze(primary, higher)?;
        Ok(EntryRecommendation::from_prediction(&prediction, primary))
    }

    /// Fetch 1h/4h series from a feed and analyze them.
    ///
    /// Fails with [`AnalysisError::NoData`] when the feed has no 1h data.
    pub fn analyze_symbol(&self, feed: &dyn feed::PriceFeed, symbol: &str) -> Result<Prediction> {
        let data = feed::fetch_timeframes(feed, symbol, self.config.feed_limit)?;
        self.analyze(&data.primary, Some(&data.higher))
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()?;
        for d in &self.builtin {
            d.validate_config()?;
        }
        for d in &self.custom {
            d.validate_config()?;
        }
        Ok(())
    }
}

fn ensure_not_empty(series: &CandleSeries) -> Result<()> {
    if series.is_empty() {
        return Err(AnalysisError::InsufficientData { need: 1, got: 0 });
    }
    Ok(())
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating Analyzer instances
pub struct AnalyzerBuilder<C: ContextProvider = DefaultContextProvider> {
    context_provider: C,
    builtin: Vec<BuiltinDetector>,
    custom: Vec<Box<dyn Detector>>,
    config: AnalyzerConfig,
}

impl Default for AnalyzerBuilder<DefaultContextProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyzerBuilder<DefaultContextProvider> {
    pub fn new() -> Self {
        Self {
            context_provider: DefaultContextProvider,
            builtin: Vec::new(),
            custom: Vec::new(),
            config: AnalyzerConfig::default(),
        }
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl<C: ContextProvider> AnalyzerBuilder<C> {
    /// Change context provider
    pub fn context_provider<C2: ContextProvider>(self, provider: C2) -> AnalyzerBuilder<C2> {
        AnalyzerBuilder {
            context_provider: provider,
            builtin: self.builtin,
            custom: self.custom,
            config: self.config,
        }
    }

    /// Add every builtin detector with default settings
    pub fn with_all_defaults(self) -> Self {
        self.with_structure_defaults()
            .with_zone_defaults()
            .with_liquidity_defaults()
            .with_confluence_defaults()
    }

    /// MSS, BOS, CHoCH, SMC structure break, ICT reversal
    pub fn with_structure_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            MarketStructureShift,
            BreakOfStructure,
            ChangeOfCharacter,
            SmcStructureBreak,
            IctLiquidityGrab,
        ]);
        self
    }

    /// Order blocks, S/R, supply/demand, quasimodo, FVG, IFVG
    pub fn with_zone_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            OrderBlocks,
            SupportResistance,
            SupplyDemand,
            Quasimodo,
            FairValueGap,
            InverseFairValueGap,
        ]);
        self
    }

    /// Liquidity zones, sweeps, grabs, smart money divergence
    pub fn with_liquidity_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            LiquidityZones,
            LiquiditySweep,
            LiquidityGrab,
            SmartMoneyDivergence,
        ]);
        self
    }

    /// HTF bias, LTF structure, QMLR multi-factor, traditional indicators
    pub fn with_confluence_defaults(mut self) -> Self {
        self.builtin.extend(builtin_defaults![
            HigherTimeframeBias,
            LowerTimeframeStructure,
            QmlrConfluence,
            Traditional,
        ]);
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.builtin.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Add a custom detector
    pub fn add_custom<D: Detector + 'static>(mut self, detector: D) -> Self {
        self.custom.push(Box::new(detector));
        self
    }

    pub fn min_confidence(mut self, confidence: f64) -> Self {
        self.config.min_confidence = confidence;
        self
    }

    pub fn swing_window(mut self, window: Period) -> Self {
        self.config.swing_window = window;
        self
    }

    pub fn aggregator(mut self, aggregator: Aggregator) -> Self {
        self.config.aggregator = aggregator;
        self
    }

    pub fn feed_limit(mut self, limit: usize) -> Self {
        self.config.feed_limit = limit;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the analyzer
    pub fn build(self) -> Result<Analyzer<C>> {
        let analyzer = Analyzer {
            builtin: self.builtin,
            custom: self.custom,
            context_provider: self.context_provider,
            config: self.config,
        };
        analyzer.validate()?;
        Ok(analyzer)
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use rayon::prelude::*;

/// Prediction for a single instrument
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolPrediction {
    pub symbol: String,
    pub prediction: Prediction,
}

/// Error from analyzing a single instrument
#[derive(Debug)]
pub struct SymbolError {
    pub symbol: String,
    pub error: AnalysisError,
}

/// Parallel analysis of multiple instruments
pub fn analyze_parallel<'a, I, C>(
    analyzer: &Analyzer<C>,
    instruments: I,
) -> (Vec<SymbolPrediction>, Vec<SymbolError>)
where
    I: IntoParallelIterator<Item = (&'a str, &'a CandleSeries)>,
    C: ContextProvider + Sync,
{
    split_results(instruments.into_par_iter().map(|(symbol, series)| {
        (symbol, analyzer.analyze(series, None))
    }))
}

/// Parallel fetch-and-analyze of multiple symbols through one feed
pub fn analyze_symbols_parallel<C>(
    analyzer: &Analyzer<C>,
    feed: &dyn feed::PriceFeed,
    symbols: &[&str],
) -> (Vec<SymbolPrediction>, Vec<SymbolError>)
where
    C: ContextProvider + Sync,
{
    split_results(
        symbols
            .par_iter()
            .map(|symbol| (*symbol, analyzer.analyze_symbol(feed, symbol))),
    )
}

fn split_results<'a, P>(results: P) -> (Vec<SymbolPrediction>, Vec<SymbolError>)
where
    P: ParallelIterator<Item = (&'a str, Result<Prediction>)>,
{
    let results: Vec<_> = results.collect();

    let mut successes = Vec::new();
    let mut errors = Vec::new();

    for (symbol, result) in results {
        match result {
            Ok(prediction) => successes.push(SymbolPrediction {
                symbol: symbol.to_string(),
                prediction,
            }),
            Err(error) => errors.push(SymbolError {
                symbol: symbol.to_string(),
                error,
            }),
        }
    }

    (successes, errors)
}

// ============================================================
// TYPE ALIASES
// ============================================================

/// Default analyzer with DefaultContextProvider
pub type DefaultAnalyzer = Analyzer<DefaultContextProvider>;

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::PredictedDirection;
    use crate::signal::SignalStatus;

    /// Test OHLCV bar
    #[derive(Debug, Clone)]
    struct Bar {
        o: f64,
        h: f64,
        l: f64,
        c: f64,
        v: f64,
    }

    impl Bar {
        fn new(o: f64, h: f64, l: f64, c: f64) -> Self {
            Self {
                o,
                h,
                l,
                c,
                v: 1000.0,
            }
        }
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.o
        }

        fn high(&self) -> f64 {
            self.h
        }

        fn low(&self) -> f64 {
            self.l
        }

        fn close(&self) -> f64 {
            self.c
        }

        fn volume(&self) -> f64 {
            self.v
        }
    }

    fn make_uptrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                Bar::new(c - 0.3, c + 0.2, c - 0.5, c)
            })
            .collect()
    }

    fn make_downtrend_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 200.0 - i as f64 * 0.5;
                Bar::new(c + 0.3, c + 0.5, c - 0.2, c)
            })
            .collect()
    }

    struct Exploding;

    impl Detector for Exploding {
        fn id(&self) -> DetectorId {
            DetectorId("exploding")
        }

        fn min_candles(&self) -> usize {
            1
        }

        fn detect(&self, _ctx: &AnalysisContext<'_>) -> Result<Signal> {
            panic!("division by zero on a flat window")
        }
    }

    struct Erroring;

    impl Detector for Erroring {
        fn id(&self) -> DetectorId {
            DetectorId("erroring")
        }

        fn min_candles(&self) -> usize {
            1
        }

        fn detect(&self, _ctx: &AnalysisContext<'_>) -> Result<Signal> {
            Err(AnalysisError::Detector {
                id: "erroring",
                reason: "bad window".to_string(),
            })
        }
    }

    #[test]
    fn test_tolerances_reject_non_fractions() {
        assert_eq!(Ratio::new(0.001).unwrap().get(), 0.001);
        for bad in [-0.001, 1.5, f64::NAN, f64::INFINITY] {
            assert!(Ratio::new(bad).is_err(), "{bad}");
        }
        assert!(matches!(Period::new(0), Err(AnalysisError::InvalidValue(_))));

        let window: std::result::Result<Period, _> = serde_json::from_str("0");
        assert!(window.is_err());
    }

    #[test]
    fn test_rejection_candle_shape() {
        // long lower wick, small bearish body near the high
        let pin = Bar::new(1.1050, 1.1060, 1.0990, 1.1045);
        assert!(pin.is_bearish());
        assert!((pin.body() - 0.0005).abs() < 1e-9);
        assert!((pin.range() - 0.0070).abs() < 1e-9);
        assert!(pin.body_ratio().unwrap() < 0.1);
        assert!(pin.validate().is_ok());

        let flat = Bar::new(1.1, 1.1, 1.1, 1.1);
        assert_eq!(flat.body_ratio(), None);
        assert!(Bar::new(1.1050, 1.1040, 1.0990, 1.1045).validate().is_err());
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::Bullish.inverse(), Direction::Bearish);
        assert_eq!(Direction::Neutral.inverse(), Direction::Neutral);
        assert_eq!(Direction::from_counts(2, 1), Direction::Bullish);
        assert_eq!(Direction::from_counts(1, 1), Direction::Neutral);
        assert_eq!(Direction::from_counts(0, 3), Direction::Bearish);
    }

    #[test]
    fn test_builder_all_defaults() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(analyzer.detector_count(), 19);
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(AnalyzerBuilder::new().min_confidence(120.0).build().is_err());
        assert!(AnalyzerBuilder::new().feed_limit(0).build().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: AnalyzerConfig =
            serde_json::from_str(r#"{"min_confidence": 75.0, "aggregator": "smc_bias"}"#).unwrap();
        assert_eq!(config.min_confidence, 75.0);
        assert_eq!(config.aggregator, Aggregator::SmcBias);
        assert_eq!(config.swing_window.get(), 5);
        assert_eq!(config.feed_limit, 200);
        assert!(serde_json::from_str::<AnalyzerConfig>(r#"{"swing_window": 0}"#).is_err());
    }

    #[test]
    fn test_empty_series_is_an_error() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let empty = CandleSeries::default();
        assert!(matches!(
            analyzer.analyze(&empty, None),
            Err(AnalysisError::InsufficientData { need: 1, got: 0 })
        ));
    }

    #[test]
    fn test_short_series_degrades_to_insufficient_signals() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let series = CandleSeries::from_bars(&make_uptrend_bars(3)).unwrap();
        let ctx = analyzer.context(&series, None);
        let set = analyzer.signals(&ctx);
        assert_eq!(set.signals.len(), 19);
        assert!(set
            .signals
            .iter()
            .all(|s| !s.detected && s.status == SignalStatus::InsufficientData));

        let prediction = analyzer.analyze(&series, None).unwrap();
        assert_eq!(prediction.direction, PredictedDirection::Up);
        assert_eq!(prediction.confidence, 70.0);
    }

    #[test]
    fn test_failures_are_isolated() {
        let analyzer = AnalyzerBuilder::new()
            .with_structure_defaults()
            .add_custom(Exploding)
            .add_custom(Erroring)
            .build()
            .unwrap();
        let series = CandleSeries::from_bars(&make_uptrend_bars(60)).unwrap();
        let ctx = analyzer.context(&series, None);
        let set = analyzer.signals(&ctx);

        for id in [DetectorId("exploding"), DetectorId("erroring")] {
            let s = set.get(id).unwrap();
            assert_eq!(s.status, SignalStatus::Failed);
            assert_eq!(s.direction, Direction::Neutral);
            assert_eq!(s.strength, 0.0);
        }
        assert!(set.is_detected(DetectorId::MARKET_STRUCTURE_SHIFT));
        assert!(analyzer.analyze(&series, None).is_ok());
    }

    #[test]
    fn test_uptrend_predicts_up() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let series = CandleSeries::from_bars(&make_uptrend_bars(120)).unwrap();
        let prediction = analyzer.analyze(&series, None).unwrap();
        assert_eq!(prediction.direction, PredictedDirection::Up);
        assert!(prediction.meets_threshold);
    }

    #[test]
    fn test_downtrend_predicts_down() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let series = CandleSeries::from_bars(&make_downtrend_bars(120)).unwrap();
        let prediction = analyzer.analyze(&series, None).unwrap();
        assert_eq!(prediction.direction, PredictedDirection::Down);
    }

    #[test]
    fn test_strict_provider_has_no_structure_on_monotonic_series() {
        let analyzer = AnalyzerBuilder::new()
            .with_structure_defaults()
            .context_provider(StrictSwingProvider)
            .build()
            .unwrap();
        let series = CandleSeries::from_bars(&make_uptrend_bars(60)).unwrap();
        let ctx = analyzer.context(&series, None);
        assert!(ctx.structure.lows.is_empty());
        let set = analyzer.signals(&ctx);
        assert!(!set.is_detected(DetectorId::BREAK_OF_STRUCTURE));
    }

    #[test]
    fn test_parallel_analysis() {
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let up = CandleSeries::from_bars(&make_uptrend_bars(80)).unwrap();
        let down = CandleSeries::from_bars(&make_downtrend_bars(80)).unwrap();
        let empty = CandleSeries::default();

        let instruments: Vec<(&str, &CandleSeries)> =
            vec![("EURUSD", &up), ("GBPUSD", &down), ("EMPTY", &empty)];

        let (results, errors) = analyze_parallel(&analyzer, instruments);
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].symbol, "EMPTY");
    }
}
