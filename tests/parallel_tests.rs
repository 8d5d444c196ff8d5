use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quickcheck::quickcheck;

use flowline::{ExecConfig, Pipeline};

quickcheck! {
    fn prop_parallel_fold_matches_sequential(items: Vec<i32>) -> bool {
        let sequential = Pipeline::from_vec(items.clone())
            .fold(|| 0i64, |acc, x| *acc += i64::from(x), |a, b| a + b)
            .unwrap();
        let parallel = Pipeline::from_vec(items)
            .parallel()
            .fold(|| 0i64, |acc, x| *acc += i64::from(x), |a, b| a + b)
            .unwrap();
        sequential == parallel
    }

    fn prop_parallel_to_vec_preserves_order(items: Vec<u8>) -> bool {
        let result = Pipeline::from_vec(items.clone())
            .parallel()
            .to_vec()
            .unwrap();
        result == items
    }
}

#[test]
fn test_parallel_map_preserves_encounter_order() {
    for n in [0i64, 1, 2, 1000] {
        let expected: Vec<i64> = (0..n).collect();
        let result = Pipeline::from_range(0..n)
            .map(|x| x)
            .parallel()
            .to_vec()
            .unwrap();
        assert_eq!(result, expected, "order broken for n={}", n);
    }
}

#[test]
fn test_parallel_matches_sequential_reduction() {
    let sequential = Pipeline::from_range(0..10)
        .filter(|x| x % 2 == 0)
        .map(|x| x * x)
        .count()
        .unwrap();
    let parallel = Pipeline::from_range(0..10)
        .filter(|x| x % 2 == 0)
        .map(|x| x * x)
        .parallel()
        .count()
        .unwrap();
    assert_eq!(sequential, 5);
    assert_eq!(parallel, 5);
}

#[test]
fn test_parallel_sum_matches_sequential_on_random_input() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(42);
    let items: Vec<i64> = (0..50_000).map(|_| rng.gen_range(-1000..1000)).collect();

    let sequential = Pipeline::from_vec(items.clone())
        .fold(|| 0i64, |acc, x| *acc += x, |a, b| a + b)
        .unwrap();
    let parallel = Pipeline::from_vec(items)
        .parallel()
        .fold(|| 0i64, |acc, x| *acc += x, |a, b| a + b)
        .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn test_limit_and_skip_are_exact_under_parallelism() {
    let first = Pipeline::from_range(0..1000)
        .parallel()
        .limit(10)
        .to_vec()
        .unwrap();
    assert_eq!(first, (0..10).collect::<Vec<i64>>());

    let last = Pipeline::from_range(0..1000)
        .parallel()
        .skip(990)
        .to_vec()
        .unwrap();
    assert_eq!(last, (990..1000).collect::<Vec<i64>>());
}

#[test]
fn test_short_circuit_stops_well_before_exhaustion() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let found = Pipeline::from_range(0..1_000_000)
        .peek(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .parallel()
        .any_match(|x| *x == 500_000)
        .unwrap();
    assert!(found);
    let processed = pulled.load(Ordering::SeqCst);
    assert!(
        processed < 1_000_000,
        "short circuit processed every element ({})",
        processed
    );
}

#[test]
fn test_any_match_exactness() {
    // Exactly one qualifying element; the answer must be true every run.
    for _ in 0..10 {
        let found = Pipeline::from_range(0..100_000)
            .parallel()
            .any_match(|x| *x == 99_999)
            .unwrap();
        assert!(found);
    }
}

#[test]
fn test_find_first_is_leftmost_under_parallelism() {
    let result = Pipeline::from_range(0..100_000)
        .filter(|x| x % 10_000 == 7)
        .parallel()
        .find_first()
        .unwrap();
    assert_eq!(result, Some(7));
}

#[test]
fn test_find_any_finds_some_match() {
    let result = Pipeline::from_range(0..100_000)
        .filter(|x| x % 10_000 == 7)
        .parallel()
        .find_any()
        .unwrap();
    let found = result.expect("a match exists");
    assert_eq!(found % 10_000, 7);
}

#[test]
fn test_parallel_distinct_shares_one_seen_set() {
    let items: Vec<i64> = (0..10_000).map(|x| x % 100).collect();
    let mut result = Pipeline::from_vec(items)
        .distinct()
        .parallel()
        .to_vec()
        .unwrap();
    result.sort();
    assert_eq!(result, (0..100).collect::<Vec<i64>>());
}

#[test]
fn test_parallel_for_each_visits_every_element_once() {
    let visits = Arc::new(AtomicUsize::new(0));
    let counter = visits.clone();
    Pipeline::from_range(0..10_000)
        .parallel()
        .for_each(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(visits.load(Ordering::SeqCst), 10_000);
}

#[test]
fn test_parallel_sorted_output() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(7);
    let items: Vec<i64> = (0..5_000).map(|_| rng.gen_range(0..100_000)).collect();
    let mut expected = items.clone();
    expected.sort();

    let result = Pipeline::from_vec(items)
        .sorted()
        .parallel()
        .to_vec()
        .unwrap();
    assert_eq!(result, expected);
}

#[test]
fn test_parallel_concat_keeps_segment_order() {
    let first = Pipeline::from_range(0..500);
    let second = Pipeline::from_range(500..1000);
    let result = first.concat(second).parallel().to_vec().unwrap();
    assert_eq!(result, (0..1000).collect::<Vec<i64>>());
}

#[test]
fn test_explicit_exec_config() {
    let config = ExecConfig {
        num_workers: Some(2),
        split_threshold: 10,
        max_split_depth: Some(3),
    };
    let result = Pipeline::from_range(0..1000)
        .parallel_with(config)
        .fold(|| 0i64, |acc, x| *acc += x, |a, b| a + b)
        .unwrap();
    assert_eq!(result, 499_500);
}

#[test]
fn test_single_worker_config_falls_back_to_sequential() {
    let config = ExecConfig {
        num_workers: Some(1),
        ..ExecConfig::default()
    };
    let result = Pipeline::from_range(0..100)
        .parallel_with(config)
        .to_vec()
        .unwrap();
    assert_eq!(result, (0..100).collect::<Vec<i64>>());
}

#[test]
fn test_iter_source_parallel_reduction() {
    // Unknown-size sources split by batch carving; results must still agree.
    let sum = Pipeline::from_iter((0..10_000).filter(|x| x % 3 == 0))
        .parallel()
        .fold(|| 0i64, |acc, x| *acc += x as i64, |a, b| a + b)
        .unwrap();
    let expected: i64 = (0..10_000).filter(|x| x % 3 == 0).map(|x| x as i64).sum();
    assert_eq!(sum, expected);
}
