//! Reduction descriptions
//!
//! A reduction tells the engine how to build a fresh accumulator, fold one
//! element into it, merge two accumulators, and finish into a result. A
//! concurrent reduction instead folds every branch into one shared
//! thread-safe accumulator handle and skips merging. Short-circuiting
//! reductions carry a probe consulted between elements.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::source::Comparator;

type Supply<A> = Arc<dyn Fn() -> A + Send + Sync>;
type Accumulate<T, A> = Arc<dyn Fn(&mut A, T) + Send + Sync>;
type Combine<A> = Arc<dyn Fn(A, A) -> A + Send + Sync>;
type Finish<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;
type Share<A> = Arc<dyn Fn(&A) -> A + Send + Sync>;
type Probe<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// How to reduce a pipeline's elements into a result.
pub struct Reduction<T, A, R> {
    pub(crate) supply: Supply<A>,
    pub(crate) accumulate: Accumulate<T, A>,
    pub(crate) combine: Combine<A>,
    pub(crate) finish: Finish<A, R>,
    pub(crate) share: Option<Share<A>>,
    pub(crate) short_circuit: Option<Probe<A>>,
    pub(crate) cancels_globally: bool,
}

impl<T, A, R> Clone for Reduction<T, A, R> {
    fn clone(&self) -> Self {
        Reduction {
            supply: self.supply.clone(),
            accumulate: self.accumulate.clone(),
            combine: self.combine.clone(),
            finish: self.finish.clone(),
            share: self.share.clone(),
            short_circuit: self.short_circuit.clone(),
            cancels_globally: self.cancels_globally,
        }
    }
}

impl<T, A, R> Reduction<T, A, R> {
    pub fn new(
        supply: impl Fn() -> A + Send + Sync + 'static,
        accumulate: impl Fn(&mut A, T) + Send + Sync + 'static,
        combine: impl Fn(A, A) -> A + Send + Sync + 'static,
        finish: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Reduction<T, A, R> {
        Reduction {
            supply: Arc::new(supply),
            accumulate: Arc::new(accumulate),
            combine: Arc::new(combine),
            finish: Arc::new(finish),
            share: None,
            short_circuit: None,
            cancels_globally: false,
        }
    }

    /// Mark the accumulator as a cloneable handle to one shared thread-safe
    /// cell: parallel leaves fold into clones of a single supplied handle
    /// and the merge step is skipped.
    pub fn concurrent(mut self) -> Reduction<T, A, R>
    where
        A: Clone,
    {
        self.share = Some(Arc::new(|acc: &A| acc.clone()));
        self
    }

    /// Install a short-circuit probe: a branch stops pulling once the probe
    /// is satisfied by its accumulator. When `cancels_globally` is set, a
    /// satisfied probe also stops every other branch cooperatively.
    pub fn short_circuit_when(
        mut self,
        probe: impl Fn(&A) -> bool + Send + Sync + 'static,
        cancels_globally: bool,
    ) -> Reduction<T, A, R> {
        self.short_circuit = Some(Arc::new(probe));
        self.cancels_globally = cancels_globally;
        self
    }
}

// ================================
// Stock reductions
// ================================

/// Count the elements.
pub fn count<T>() -> Reduction<T, u64, u64> {
    Reduction::new(
        || 0u64,
        |acc, _item| *acc += 1,
        |a, b| a + b,
        |acc| acc,
    )
}

/// Collect the elements into a vector, preserving encounter order.
pub fn to_vec<T: Send + 'static>() -> Reduction<T, Vec<T>, Vec<T>> {
    Reduction::new(
        Vec::new,
        |acc: &mut Vec<T>, item| acc.push(item),
        |mut a, mut b| {
            a.append(&mut b);
            a
        },
        |acc| acc,
    )
}

/// Reduce pairwise with an associative operation; `None` on empty input.
pub fn reduce_with<T: Send + 'static>(
    op: impl Fn(T, T) -> T + Send + Sync + 'static,
) -> Reduction<T, Option<T>, Option<T>> {
    let op = Arc::new(op);
    let fold_op = op.clone();
    Reduction::new(
        || None,
        move |acc: &mut Option<T>, item| {
            *acc = match acc.take() {
                Some(current) => Some((*fold_op)(current, item)),
                None => Some(item),
            };
        },
        move |a, b| match (a, b) {
            (Some(a), Some(b)) => Some((*op)(a, b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        },
        |acc| acc,
    )
}

/// Keep the extreme element under `cmp`; `keep_greater` selects max vs min.
/// Ties keep the earlier element.
pub fn extreme_by<T: Send + 'static>(
    cmp: Arc<Comparator<T>>,
    keep_greater: bool,
) -> Reduction<T, Option<T>, Option<T>> {
    let replace = move |current: &T, candidate: &T| {
        let order = (*cmp)(candidate, current);
        if keep_greater {
            order == Ordering::Greater
        } else {
            order == Ordering::Less
        }
    };
    let fold_replace = replace.clone();
    Reduction::new(
        || None,
        move |acc: &mut Option<T>, item| {
            let take = match acc {
                Some(current) => fold_replace(current, &item),
                None => true,
            };
            if take {
                *acc = Some(item);
            }
        },
        move |a, b| match (a, b) {
            (Some(a), Some(b)) => {
                if replace(&a, &b) {
                    Some(b)
                } else {
                    Some(a)
                }
            }
            (Some(a), None) => Some(a),
            (None, b) => b,
        },
        |acc| acc,
    )
}

/// True once any element satisfies the predicate; short-circuits globally.
pub fn any_match<T>(
    predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
) -> Reduction<T, bool, bool> {
    Reduction::new(
        || false,
        move |acc, item| {
            if predicate(&item) {
                *acc = true;
            }
        },
        |a, b| a || b,
        |acc| acc,
    )
    .short_circuit_when(|acc| *acc, true)
}

/// False once any element fails the predicate; short-circuits globally.
pub fn all_match<T>(
    predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
) -> Reduction<T, bool, bool> {
    Reduction::new(
        || true,
        move |acc, item| {
            if !predicate(&item) {
                *acc = false;
            }
        },
        |a, b| a && b,
        |acc| acc,
    )
    .short_circuit_when(|acc| !*acc, true)
}

/// The first element in encounter order. Each branch stops after its own
/// first element, but the search never cancels branches to its left, so the
/// leftmost result wins.
pub fn find_first<T: Send + 'static>() -> Reduction<T, Option<T>, Option<T>> {
    Reduction::new(
        || None,
        |acc: &mut Option<T>, item| {
            if acc.is_none() {
                *acc = Some(item);
            }
        },
        |a, b| a.or(b),
        |acc| acc,
    )
    .short_circuit_when(|acc: &Option<T>| acc.is_some(), false)
}

/// Any element; the first branch to find one cancels the rest.
pub fn find_any<T: Send + 'static>() -> Reduction<T, Option<T>, Option<T>> {
    Reduction::new(
        || None,
        |acc: &mut Option<T>, item| {
            if acc.is_none() {
                *acc = Some(item);
            }
        },
        |a, b| a.or(b),
        |acc| acc,
    )
    .short_circuit_when(|acc: &Option<T>| acc.is_some(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<T, A, R>(red: &Reduction<T, A, R>, items: Vec<T>) -> R {
        let mut acc = (*red.supply)();
        for item in items {
            (*red.accumulate)(&mut acc, item);
        }
        (*red.finish)(acc)
    }

    #[test]
    fn count_counts() {
        assert_eq!(run(&count(), vec![10, 20, 30]), 3);
    }

    #[test]
    fn to_vec_preserves_order_across_combine() {
        let red = to_vec::<i32>();
        let left = vec![1, 2];
        let right = vec![3, 4];
        assert_eq!((*red.combine)(left, right), vec![1, 2, 3, 4]);
    }

    #[test]
    fn reduce_with_handles_empty_sides() {
        let red = reduce_with(|a: i32, b: i32| a + b);
        assert_eq!((*red.combine)(Some(3), None), Some(3));
        assert_eq!((*red.combine)(None, Some(4)), Some(4));
        assert_eq!(run(&red, vec![1, 2, 3]), Some(6));
    }

    #[test]
    fn extreme_by_keeps_earlier_on_ties() {
        let red = extreme_by::<(i32, &str)>(
            Arc::new(|a: &(i32, &str), b: &(i32, &str)| a.0.cmp(&b.0)),
            true,
        );
        let result = run(&red, vec![(1, "a"), (3, "b"), (3, "c"), (2, "d")]);
        assert_eq!(result, Some((3, "b")));
    }

    #[test]
    fn match_probes() {
        let any = any_match(|x: &i32| *x > 2);
        assert!(run(&any, vec![1, 2, 3]));
        let all = all_match(|x: &i32| *x > 0);
        assert!(run(&all, vec![1, 2, 3]));
        assert!(!run(&all, vec![1, -2, 3]));
    }
}
