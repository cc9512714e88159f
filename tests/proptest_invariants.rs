use item_calibration::neighbor::PoolScope;
use item_calibration::{CalibrationConfig, CalibrationEngine, EstimateSource, Grade, ItemFeatures, Sample};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const REL_TOL: f64 = 1e-9;
const GROUPS: [&str; 6] = ["IncreasedLife", "FireResist", "ColdResist", "Spirit", "CastSpeed", "Armour"];

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= REL_TOL * (1.0 + expected.abs())
}

fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        prop::sample::select(vec!["Rings", "Belts", "Amulets"]),
        0.0f64..1.0,
        0u8..5,
        prop::collection::btree_set(prop::sample::select(GROUPS.to_vec()), 0..4),
        0.5f64..200.0,
        0.1f64..3.0,
    )
        .prop_map(|(class, score, grade, groups, price, confidence)| {
            let features = ItemFeatures::new(class, score)
                .with_grade(Grade::from_ordinal(grade).unwrap_or_default())
                .with_mod_groups(groups);
            Sample::new(features, price).with_sale_confidence(confidence)
        })
}

fn query_strategy() -> impl Strategy<Value = ItemFeatures> {
    (
        prop::sample::select(vec!["Rings", "Belts", "Amulets", "Gloves"]),
        0.0f64..1.0,
        prop::collection::btree_set(prop::sample::select(GROUPS.to_vec()), 0..4),
    )
        .prop_map(|(class, score, groups)| ItemFeatures::new(class, score).with_mod_groups(groups))
}

fn build(samples: Vec<Sample>) -> CalibrationEngine {
    let mut builder = CalibrationEngine::builder(CalibrationConfig::default());
    builder.extend(samples).expect("generated prices are positive");
    builder.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn estimates_are_deterministic_and_bounded(
        samples in prop::collection::vec(sample_strategy(), 0..60),
        query in query_strategy(),
    ) {
        let engine = build(samples);
        let first = engine.estimate(&query);
        prop_assert_eq!(engine.estimate(&query), first);
        prop_assert!((0.0..=1.0).contains(&first.confidence));
        match first.price {
            Some(price) => {
                prop_assert!(price.is_finite() && price > 0.0);
                prop_assert!(first.source.is_some());
            }
            None => {
                prop_assert_eq!(first.confidence, 0.0);
                prop_assert!(first.source.is_none());
            }
        }
    }

    #[test]
    fn neighbor_confidence_grows_as_nearest_gets_closer(
        offsets in (0.0f64..0.5, 0.0f64..0.5),
        n in 10usize..30,
    ) {
        let pool: Vec<Sample> = (0..n)
            .map(|_| Sample::new(ItemFeatures::new("Rings", 0.5), 5.0))
            .collect();
        let engine = build(pool);
        let (a, b) = offsets;
        let (near, far) = if a <= b { (a, b) } else { (b, a) };

        let estimate = |offset: f64| {
            engine
                .neighbors()
                .estimate(engine.store(), &ItemFeatures::new("Rings", 0.5 + offset))
                .expect("class pool is large enough")
        };
        let near_est = estimate(near);
        let far_est = estimate(far);
        prop_assert_eq!(near_est.scope, PoolScope::Class);
        prop_assert!(near_est.confidence >= far_est.confidence);
    }

    #[test]
    fn neighbor_confidence_is_monotone_over_two_clusters(
        centers in (0.0f64..1.0, 0.0f64..1.0),
        sizes in (5usize..12, 5usize..12),
        queries in (0.0f64..1.5, 0.0f64..1.5),
    ) {
        let mut pool = Vec::new();
        pool.extend((0..sizes.0).map(|_| Sample::new(ItemFeatures::new("Rings", centers.0), 2.0)));
        pool.extend((0..sizes.1).map(|_| Sample::new(ItemFeatures::new("Rings", centers.1), 20.0)));
        let engine = build(pool);

        let knn = |score: f64| {
            engine
                .neighbors()
                .estimate(engine.store(), &ItemFeatures::new("Rings", score))
                .expect("class pool is large enough")
        };
        let (a, b) = (knn(queries.0), knn(queries.1));
        let (closer, farther) = if a.nearest_distance <= b.nearest_distance { (a, b) } else { (b, a) };
        prop_assert!(
            closer.confidence >= farther.confidence,
            "nearest {} gave {} but nearest {} gave {}",
            closer.nearest_distance, closer.confidence, farther.nearest_distance, farther.confidence
        );

        let cascade = |score: f64| engine.estimate(&ItemFeatures::new("Rings", score));
        let (ca, cb) = (cascade(queries.0), cascade(queries.1));
        prop_assert_eq!(ca.source, Some(EstimateSource::NeighborsClass));
        if a.nearest_distance <= b.nearest_distance {
            prop_assert!(ca.confidence >= cb.confidence);
        } else {
            prop_assert!(cb.confidence >= ca.confidence);
        }
    }

    #[test]
    fn grade_median_is_the_true_median(
        prices in prop::collection::vec(0.5f64..500.0, 1..10),
    ) {
        let samples: Vec<Sample> = prices
            .iter()
            .map(|p| Sample::new(ItemFeatures::new("Belts", 0.3).with_grade(Grade::B), *p))
            .collect();
        let engine = build(samples);
        let est = engine.estimate(&ItemFeatures::new("Belts", 0.3).with_grade(Grade::B));

        let mut sorted = prices.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let expected = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        prop_assert_eq!(est.source, Some(EstimateSource::GradeMedian));
        let price = est.price.expect("grade median answers");
        prop_assert!(close(price, expected), "got {} expected {}", price, expected);
    }
}
