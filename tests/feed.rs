//! Price feed boundary: static feeds, fallback chains, timeframe fetches and
//! the TTL price cache.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use smc_confluence::prelude::*;

fn trend(n: usize, start: f64, step: f64, spacing: i64) -> CandleSeries {
    let candles = (0..n)
        .map(|i| {
            let c = start + i as f64 * step;
            Candle::new(i as i64 * spacing, c - 0.3, c + 0.2, c - 0.5, c)
        })
        .collect();
    CandleSeries::new(candles).unwrap()
}

/// Feed that always fails
struct Offline;

impl PriceFeed for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn get_series(
        &self,
        _symbol: &str,
        _timeframe: Timeframe,
        _limit: usize,
    ) -> std::result::Result<CandleSeries, FeedError> {
        Err(FeedError::Source("connection refused".to_string()))
    }
}

// ============================================================
// FEEDS
// ============================================================

#[test]
fn test_static_feed_truncates_to_limit() {
    let feed = StaticFeed::new().with_series("EURUSD", Timeframe::H1, trend(300, 1.0, 0.001, 3600));
    let series = feed.get_series("EURUSD", Timeframe::H1, 200).unwrap();
    assert_eq!(series.len(), 200);
    assert_eq!(series.current_price(), Some(1.0 + 299.0 * 0.001));

    assert!(matches!(
        feed.get_series("EURUSD", Timeframe::M5, 200),
        Err(FeedError::Unavailable { .. })
    ));
}

#[test]
fn test_feed_chain_falls_through() {
    let chain = FeedChain::new()
        .with(Offline)
        .with(StaticFeed::new())
        .with(StaticFeed::new().with_series("GBPUSD", Timeframe::H1, trend(50, 1.2, 0.001, 3600)));
    assert_eq!(chain.len(), 3);

    let series = chain.get_series("GBPUSD", Timeframe::H1, 100).unwrap();
    assert_eq!(series.len(), 50);

    let err = chain.get_series("USDJPY", Timeframe::H1, 100).unwrap_err();
    assert!(matches!(err, FeedError::Unavailable { .. }));

    let only_offline = FeedChain::new().with(Offline);
    assert_eq!(
        only_offline.get_series("USDJPY", Timeframe::H1, 100),
        Err(FeedError::Source("connection refused".to_string()))
    );
}

#[test]
fn test_missing_primary_timeframe_is_no_data() {
    let feed = StaticFeed::new().with_series("EURUSD", Timeframe::H4, trend(50, 1.0, 0.001, 14_400));
    let err = fetch_timeframes(&feed, "EURUSD", 200).unwrap_err();
    match err {
        AnalysisError::NoData { symbol, timeframe } => {
            assert_eq!(symbol, "EURUSD");
            assert_eq!(timeframe, Timeframe::H1);
        },
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_missing_higher_timeframe_copies_primary() {
    let primary = trend(80, 1.0, 0.001, 3600);
    let feed = StaticFeed::new().with_series("EURUSD", Timeframe::H1, primary.clone());
    let data = fetch_timeframes(&feed, "EURUSD", 200).unwrap();
    assert!(data.higher_is_copy);
    assert_eq!(data.primary, primary);
    assert_eq!(data.higher, primary);

    let feed = feed.with_series("EURUSD", Timeframe::H4, trend(40, 1.0, 0.004, 14_400));
    let data = fetch_timeframes(&feed, "EURUSD", 200).unwrap();
    assert!(!data.higher_is_copy);
    assert_eq!(data.higher.len(), 40);
}

#[test]
fn test_analyze_symbol_through_feed() {
    let feed = StaticFeed::new()
        .with_series("EURUSD", Timeframe::H1, trend(120, 1.0, 0.002, 3600))
        .with_series("GBPUSD", Timeframe::H1, trend(120, 1.5, -0.002, 3600));
    let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();

    let prediction = analyzer.analyze_symbol(&feed, "EURUSD").unwrap();
    assert!((0.0..=100.0).contains(&prediction.confidence));
    assert!(matches!(
        analyzer.analyze_symbol(&feed, "USDJPY"),
        Err(AnalysisError::NoData { .. })
    ));

    let (ok, failed) =
        smc_confluence::analyze_symbols_parallel(&analyzer, &feed, &["EURUSD", "GBPUSD", "USDJPY"]);
    assert_eq!(ok.len(), 2);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].symbol, "USDJPY");
}

// ============================================================
// PRICE CACHE
// ============================================================

#[test]
fn test_cache_expires_after_ttl() {
    let cache = PriceCache::with_clock(Duration::from_secs(10), ManualClock::new());
    let calls = AtomicUsize::new(0);
    let fetch = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(1.2345)
    };

    assert_eq!(cache.get_or_fetch("EURUSD", fetch).unwrap(), 1.2345);
    cache.clock().advance(Duration::from_secs(9));
    assert_eq!(cache.get_or_fetch("EURUSD", fetch).unwrap(), 1.2345);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("EURUSD"), Some(1.2345));

    cache.clock().advance(Duration::from_secs(1));
    assert_eq!(cache.get("EURUSD"), None);
    cache.get_or_fetch("EURUSD", fetch).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_cache_current_price_uses_one_minute_feed() {
    let feed = StaticFeed::new().with_series("EURUSD", Timeframe::M1, trend(30, 1.1, 0.0001, 60));
    let cache = PriceCache::with_clock(Duration::from_secs(10), ManualClock::new());

    let price = cache.current_price(&feed, "EURUSD").unwrap();
    assert_eq!(price, 1.1 + 29.0 * 0.0001);
    assert!(cache.current_price(&feed, "USDJPY").is_err());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_cache_fetches_once_under_contention() {
    let cache = PriceCache::with_clock(Duration::from_secs(10), ManualClock::new());
    let calls = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let price = cache
                    .get_or_fetch("EURUSD", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        Ok(1.0)
                    })
                    .unwrap();
                assert_eq!(price, 1.0);
            });
        }
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fetch_can_use_the_cache_for_other_symbols() {
    let cache = PriceCache::with_clock(Duration::from_secs(10), ManualClock::new());
    cache.insert("USDJPY", 150.0);

    let price = cache
        .get_or_fetch("EURUSD", || {
            assert_eq!(cache.get("EURUSD"), None);
            assert_eq!(cache.get("USDJPY"), Some(150.0));
            let cable = cache.get_or_fetch("GBPUSD", || Ok(1.25))?;
            Ok(cable * 0.86)
        })
        .unwrap();

    assert_eq!(price, 1.25 * 0.86);
    assert_eq!(cache.get("GBPUSD"), Some(1.25));
    assert_eq!(cache.get("EURUSD"), Some(price));
    assert_eq!(cache.len(), 3);
}
