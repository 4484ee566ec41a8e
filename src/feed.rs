//! Price feed boundary
//!
//! The engine never fetches data itself. A [`PriceFeed`] supplies candle
//! series per symbol and timeframe; [`FeedChain`] falls through several feeds
//! in order and [`PriceCache`] keeps recent prices for a short TTL.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{AnalysisError, CandleSeries};

/// Default lifetime of a cached price
pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(10);

// ============================================================
// TIMEFRAME
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Length of one candle
    pub fn duration(self) -> Duration {
        let minutes = match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| FeedError::UnsupportedTimeframe(s.to_string()))
    }
}

// ============================================================
// FEEDS
// ============================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("No {timeframe} data available for {symbol}")]
    Unavailable { symbol: String, timeframe: Timeframe },

    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    #[error("Feed error: {0}")]
    Source(String),
}

/// Source of candle series.
///
/// Implementations return candles in ascending time order with at most
/// `limit` entries.
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &str;

    fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FeedError>;
}

/// In-memory feed
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    series: HashMap<(String, Timeframe), CandleSeries>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, timeframe: Timeframe, series: CandleSeries) {
        self.series.insert((symbol.to_string(), timeframe), series);
    }

    pub fn with_series(mut self, symbol: &str, timeframe: Timeframe, series: CandleSeries) -> Self {
        self.insert(symbol, timeframe, series);
        self
    }
}

impl PriceFeed for StaticFeed {
    fn name(&self) -> &str {
        "static"
    }

    fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FeedError> {
        self.series
            .get(&(symbol.to_string(), timeframe))
            .filter(|s| !s.is_empty())
            .map(|s| s.truncated(limit))
            .ok_or_else(|| FeedError::Unavailable {
                symbol: symbol.to_string(),
                timeframe,
            })
    }
}

/// Tries each feed in order and returns the first success
#[derive(Default)]
pub struct FeedChain {
    feeds: Vec<Box<dyn PriceFeed>>,
}

impl FeedChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F: PriceFeed + 'static>(mut self, feed: F) -> Self {
        self.feeds.push(Box::new(feed));
        self
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

impl PriceFeed for FeedChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<CandleSeries, FeedError> {
        let mut last_error = None;
        for feed in &self.feeds {
            match feed.get_series(symbol, timeframe, limit) {
                Ok(series) if !series.is_empty() => {
                    trace!(feed = feed.name(), symbol, %timeframe, "feed hit");
                    return Ok(series);
                },
                Ok(_) => {
                    warn!(feed = feed.name(), symbol, %timeframe, "feed returned no candles");
                },
                Err(error) => {
                    warn!(feed = feed.name(), symbol, %timeframe, %error, "feed failed");
                    last_error = Some(error);
                },
            }
        }
        Err(last_error.unwrap_or_else(|| FeedError::Unavailable {
            symbol: symbol.to_string(),
            timeframe,
        }))
    }
}

/// Primary (1h) and higher-timeframe (4h) series for one symbol
#[derive(Debug, Clone)]
pub struct TimeframeSeries {
    pub primary: CandleSeries,
    pub higher: CandleSeries,
    /// The feed had no 4h data and `higher` is a copy of `primary`
    pub higher_is_copy: bool,
}

/// Fetch the 1h series (required) and the 4h series (optional).
pub fn fetch_timeframes(
    feed: &dyn PriceFeed,
    symbol: &str,
    limit: usize,
) -> crate::Result<TimeframeSeries> {
    let primary = match feed.get_series(symbol, Timeframe::H1, limit) {
        Ok(series) if !series.is_empty() => series,
        other => {
            if let Err(error) = other {
                debug!(symbol, %error, "no primary series");
            }
            return Err(AnalysisError::NoData {
                symbol: symbol.to_string(),
                timeframe: Timeframe::H1,
            });
        },
    };

    match feed.get_series(symbol, Timeframe::H4, limit) {
        Ok(higher) if !higher.is_empty() => Ok(TimeframeSeries {
            primary,
            higher,
            higher_is_copy: false,
        }),
        _ => {
            warn!(symbol, "no 4h series, using 1h in its place");
            Ok(TimeframeSeries {
                higher: primary.clone(),
                primary,
                higher_is_copy: true,
            })
        },
    }
}

// ============================================================
// CLOCK
// ============================================================

/// Monotonic time source for cache expiry
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ============================================================
// PRICE CACHE
// ============================================================

/// Latest price per symbol, valid for a fixed TTL.
///
/// Refreshes for one symbol are serialized through a per-symbol gate, so
/// concurrent callers fetch at most once per TTL. No map lock is held while a
/// fetch runs, so other symbols stay readable during a slow fetch.
pub struct PriceCache<C: Clock = SystemClock> {
    entries: DashMap<String, (f64, Duration)>,
    gates: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
    clock: C,
}

impl PriceCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock::default())
    }
}

impl Default for PriceCache<SystemClock> {
    fn default() -> Self {
        Self::new(DEFAULT_PRICE_TTL)
    }
}

impl<C: Clock> PriceCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            gates: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[inline]
    fn is_fresh(&self, stored_at: Duration) -> bool {
        self.clock.now().saturating_sub(stored_at) < self.ttl
    }

    /// Cached price if still fresh
    pub fn get(&self, symbol: &str) -> Option<f64> {
        let entry = self.entries.get(symbol)?;
        let (price, stored_at) = *entry;
        self.is_fresh(stored_at).then_some(price)
    }

    pub fn insert(&self, symbol: &str, price: f64) {
        self.entries
            .insert(symbol.to_string(), (price, self.clock.now()));
    }

    /// Fresh cached price, or the result of `fetch` stored under `symbol`.
    ///
    /// Fetch errors are returned and nothing is cached. `fetch` may read or
    /// fill other symbols, but must not call `get_or_fetch` for the same
    /// symbol: that waits on its own gate.
    pub fn get_or_fetch<F>(&self, symbol: &str, fetch: F) -> Result<f64, FeedError>
    where
        F: FnOnce() -> Result<f64, FeedError>,
    {
        if let Some(price) = self.get(symbol) {
            trace!(symbol, "price cache hit");
            return Ok(price);
        }

        let gate = self.gates.entry(symbol.to_string()).or_default().clone();
        let _held = gate.lock().unwrap_or_else(PoisonError::into_inner);

        // filled by another caller while this one waited
        if let Some(price) = self.get(symbol) {
            trace!(symbol, "price cache filled while waiting");
            return Ok(price);
        }

        debug!(symbol, "price cache miss");
        let price = fetch()?;
        self.insert(symbol, price);
        Ok(price)
    }

    /// Latest 1m close for `symbol`, through the cache
    pub fn current_price(&self, feed: &dyn PriceFeed, symbol: &str) -> Result<f64, FeedError> {
        self.get_or_fetch(symbol, || {
            feed.get_series(symbol, Timeframe::M1, 1)?
                .current_price()
                .ok_or_else(|| FeedError::Unavailable {
                    symbol: symbol.to_string(),
                    timeframe: Timeframe::M1,
                })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
