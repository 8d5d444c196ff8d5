use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowline::{Bridged, Pipeline, PipelineError};

#[test]
fn test_every_fork_sees_every_element() {
    let forks = Pipeline::from_vec(vec![1, 2, 3, 4]).fork(3);
    assert_eq!(forks.len(), 3);
    for fork in forks {
        assert_eq!(fork.to_vec().unwrap(), vec![1, 2, 3, 4]);
    }
}

#[test]
fn test_forks_are_independent_pipelines() {
    let forks = Pipeline::from_range(0..100).fork(2);
    let mut forks = forks.into_iter();
    let evens = forks.next().unwrap();
    let sum = forks.next().unwrap();

    let even_count = evens.filter(|x| x % 2 == 0).count().unwrap();
    assert_eq!(even_count, 50);

    let total = sum.fold(|| 0i64, |acc, x| *acc += x, |a, b| a + b).unwrap();
    assert_eq!(total, 4950);
}

#[test]
fn test_forks_consumable_from_separate_threads() {
    let forks = Pipeline::from_range(0..10_000).fork(2);
    let mut handles = Vec::new();
    for fork in forks {
        handles.push(std::thread::spawn(move || fork.count().unwrap()));
    }
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 10_000);
    }
}

#[test]
#[should_panic(expected = "already been consumed")]
fn test_forked_original_is_linked() {
    let pipeline = Pipeline::from_vec(vec![1, 2, 3]);
    let _forks = pipeline.fork(2);
    let _late = pipeline.map(|x| x);
}

#[test]
fn test_shared_upstream_closes_exactly_once_after_last_fork() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let pipeline = Pipeline::from_vec(vec![1, 2, 3])
        .on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let forks = pipeline.fork(2);
    let mut forks = forks.into_iter();
    let first = forks.next().unwrap();
    let second = forks.next().unwrap();

    first.to_vec().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    second.to_vec().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_dropping_unused_forks_still_releases_upstream() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    let pipeline = Pipeline::from_vec(vec![1, 2, 3])
        .on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    {
        let forks = pipeline.fork(3);
        let mut forks = forks.into_iter();
        let used = forks.next().unwrap();
        assert_eq!(used.count().unwrap(), 3);
        // The remaining forks are dropped unconsumed.
    }
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_bridge_with_new_sequence() {
    let result = Pipeline::from_vec(vec![1, 2, 3])
        .bridge(|input| -> Bridged<i32> {
            Bridged::Sequence(Box::new(input.into_sequence().map(|x| x * 10)))
        })
        .to_vec()
        .unwrap();
    assert_eq!(result, vec![10, 20, 30]);
}

#[test]
fn test_bridge_with_new_source() {
    let result = Pipeline::from_range(0..5)
        .bridge(|input| Bridged::Source(input.into_source()))
        .to_vec()
        .unwrap();
    assert_eq!(result, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_bridge_reversing_sequence() {
    // A bridge returning a genuinely different delivery mechanism: the
    // upstream is drained lazily when the bridged source is first pulled.
    let result = Pipeline::from_range(0..5)
        .bridge(|input| -> Bridged<i64> {
            let mut pending: Option<Vec<i64>> = None;
            let mut source = Some(input.into_source());
            Bridged::Sequence(Box::new(std::iter::from_fn(move || {
                let buffered = pending.get_or_insert_with(|| {
                    let mut all = Vec::new();
                    if let Some(source) = source.as_mut() {
                        source.for_each_remaining(&mut |item| all.push(item));
                    }
                    source = None;
                    all
                });
                buffered.pop()
            })))
        })
        .to_vec()
        .unwrap();
    assert_eq!(result, vec![4, 3, 2, 1, 0]);
}

#[test]
fn test_bridge_operator_must_not_start_upstream() {
    let result = Pipeline::from_vec(vec![1, 2, 3])
        .bridge(|input| -> Bridged<i32> {
            // Contract violation: draining the input inside the operator
            // body starts the upstream eagerly.
            let collected: Vec<i32> = input.into_sequence().collect();
            Bridged::Sequence(Box::new(collected.into_iter()))
        })
        .to_vec();
    assert!(matches!(
        result,
        Err(PipelineError::OperatorStartedPipeline)
    ));
}

#[test]
fn test_bridge_input_reports_upstream_shape() {
    Pipeline::from_range(0..10)
        .bridge(|input| {
            assert_eq!(input.estimate_size(), Some(10));
            Bridged::Source(input.into_source())
        })
        .count()
        .unwrap();
}
