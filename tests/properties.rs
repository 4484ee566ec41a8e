//! Property tests over random candle walks.

use proptest::prelude::*;
use smc_confluence::prelude::*;

/// Random walk of valid candles starting at 1000
fn walk() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec(
        (-5.0f64..5.0, 0.0f64..3.0, 0.0f64..3.0, 500.0f64..5000.0),
        1..160,
    )
    .prop_map(|steps| {
        let mut close = 1000.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (delta, up, down, volume))| {
                let open = close;
                close = open + delta;
                Candle::new(
                    i as i64 * 3600,
                    open,
                    open.max(close) + up,
                    open.min(close) - down,
                    close,
                )
                .with_volume(volume)
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn confidence_stays_in_bounds(candles in walk()) {
        let series = CandleSeries::new(candles).unwrap();
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();

        for aggregator in [Aggregator::MultiFactor, Aggregator::SmcBias] {
            let p = analyzer.analyze_with(aggregator, &series, None).unwrap();
            prop_assert!((0.0..=100.0).contains(&p.confidence));
            if p.meets_threshold {
                prop_assert!(p.confidence >= 70.0);
            }
        }

        let report = analyzer.report(&series, None).unwrap();
        prop_assert!((5.0..=95.0).contains(&report.final_confidence));
        prop_assert!((0.0..=95.0).contains(&report.next_direction.confidence));
    }

    #[test]
    fn multi_factor_confidence_is_clamped(candles in walk()) {
        let series = CandleSeries::new(candles).unwrap();
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let p = analyzer.analyze_with(Aggregator::MultiFactor, &series, None).unwrap();
        prop_assert!((70.0..=95.0).contains(&p.confidence));
        prop_assert!(p.direction == PredictedDirection::Up || p.direction == PredictedDirection::Down);
    }

    #[test]
    fn signals_are_well_formed(candles in walk()) {
        let series = CandleSeries::new(candles).unwrap();
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let ctx = analyzer.context(&series, None);
        let set = analyzer.signals(&ctx);

        prop_assert_eq!(set.signals.len(), 19);
        for s in &set.signals {
            prop_assert!(s.status != SignalStatus::Failed, "{} failed: {:?}", s.id, s.detail);
            prop_assert!((0.0..=1.0).contains(&s.strength));
            if s.status == SignalStatus::InsufficientData {
                prop_assert!(!s.detected);
            }
        }
    }

    #[test]
    fn swing_detection_is_idempotent(candles in walk(), window in 1usize..8) {
        let series = CandleSeries::new(candles).unwrap();
        let first = swing_points(&series, window);
        let second = swing_points(&series, window);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(structure_points(&series, window), structure_points(&series, window));

        for p in first.highs.iter().chain(&first.lows) {
            prop_assert!(p.index >= window && p.index + window < series.len());
        }
    }

    #[test]
    fn entry_follows_prediction(candles in walk()) {
        let series = CandleSeries::new(candles).unwrap();
        let analyzer = AnalyzerBuilder::new().with_all_defaults().build().unwrap();
        let prediction = analyzer.analyze(&series, None).unwrap();
        let entry = EntryRecommendation::from_prediction(&prediction, &series);

        if prediction.meets_threshold {
            prop_assert_eq!(entry.direction, Some(prediction.direction));
            let minutes = entry.duration_minutes.unwrap();
            prop_assert!(minutes == 1 || minutes == 5 || minutes == 10);
        } else {
            prop_assert_eq!(entry.entry_signal, EntrySignal::Wait);
        }
        prop_assert!(serde_json::to_string(&entry).is_ok());
        prop_assert!(serde_json::to_string(&prediction).is_ok());
    }
}
