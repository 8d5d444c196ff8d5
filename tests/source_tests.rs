use quickcheck::quickcheck;

use flowline::source::{Characteristics, IterSource, RangeSource, SplitSource, VecSource};

/// Recursively split a source and drain prefix-before-suffix, flattening the
/// split tree back into one sequence.
fn drain_splitting<T>(mut source: Box<dyn SplitSource<T>>, depth: u32, out: &mut Vec<T>) {
    if depth > 0 {
        if let Some(prefix) = source.try_split() {
            drain_splitting(prefix, depth - 1, out);
            drain_splitting(source, depth - 1, out);
            return;
        }
    }
    source.for_each_remaining(&mut |item| out.push(item));
}

quickcheck! {
    fn prop_vec_source_split_union_is_original(items: Vec<u16>, depth: u8) -> bool {
        let source: Box<dyn SplitSource<u16>> = Box::new(VecSource::new(items.clone()));
        let mut collected = Vec::new();
        drain_splitting(source, u32::from(depth % 8), &mut collected);
        collected == items
    }

    fn prop_iter_source_split_union_is_original(items: Vec<u16>, depth: u8) -> bool {
        let source: Box<dyn SplitSource<u16>> = Box::new(IterSource::new(items.clone().into_iter()));
        let mut collected = Vec::new();
        drain_splitting(source, u32::from(depth % 8), &mut collected);
        collected == items
    }

    fn prop_range_source_split_union_is_original(start: i16, len: u8) -> bool {
        let start = i64::from(start);
        let end = start + i64::from(len);
        let source: Box<dyn SplitSource<i64>> = Box::new(RangeSource::new(start..end));
        let mut collected = Vec::new();
        drain_splitting(source, 6, &mut collected);
        collected == (start..end).collect::<Vec<i64>>()
    }

    fn prop_split_halves_are_disjoint_and_sized(items: Vec<u32>) -> bool {
        let mut source = VecSource::new(items.clone());
        match source.try_split() {
            None => items.len() < 2,
            Some(prefix) => {
                let prefix_size = prefix.estimate_size().unwrap_or(0);
                let suffix_size = source.estimate_size().unwrap_or(0);
                prefix_size + suffix_size == items.len() as u64
            }
        }
    }
}

#[test]
fn test_range_source_characteristics() {
    let source = RangeSource::new(0..10);
    let chars = source.characteristics();
    assert!(chars.contains(
        Characteristics::ORDERED
            | Characteristics::SIZED
            | Characteristics::SORTED
            | Characteristics::DISTINCT
    ));
    assert_eq!(source.estimate_size(), Some(10));
}

#[test]
fn test_vec_source_advance_delivers_once_per_call() {
    let mut source = VecSource::new(vec![1, 2]);
    let mut calls = 0;
    assert!(source.try_advance(&mut |_| calls += 1));
    assert_eq!(calls, 1);
    assert!(source.try_advance(&mut |_| calls += 1));
    assert_eq!(calls, 2);
    assert!(!source.try_advance(&mut |_| calls += 1));
    assert_eq!(calls, 2);
}

#[test]
fn test_iter_source_size_hint_tracking() {
    let source = IterSource::new(vec![1, 2, 3].into_iter());
    assert_eq!(source.estimate_size(), Some(3));
    assert!(source
        .characteristics()
        .contains(Characteristics::SIZED | Characteristics::SUBSIZED));

    let unsized_source = IterSource::new((0..).take_while(|x| *x < 10));
    assert_eq!(unsized_source.estimate_size(), None);
    assert!(!unsized_source.characteristics().contains(Characteristics::SIZED));
}

#[test]
fn test_exhausted_source_stays_exhausted() {
    let mut source = VecSource::new(vec![1]);
    let mut out = Vec::new();
    source.for_each_remaining(&mut |item| out.push(item));
    assert_eq!(out, vec![1]);
    assert!(!source.try_advance(&mut |_| {}));
    assert!(source.try_split().is_none());
    assert_eq!(source.estimate_size(), Some(0));
}
