//! The public pipeline surface
//!
//! A [`Pipeline`] is a lazy chain of transformation stages over a splittable
//! source. Intermediate operations derive a new pipeline and mark the
//! receiver consumed; terminal operations start the chain, execute it
//! sequentially or in parallel, close it, and return the result.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::Hash;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::engine::{self, ExecConfig};
use crate::error::{BoxError, PipelineResult};
use crate::node::{
    DistinctNode, FilterNode, FlatMapNode, IdentityNode, MapNode, NodeFactory, PeekNode, StageNode,
};
use crate::reduce::{self, Reduction};
use crate::source::adapt::{CharsAdjust, SizeAdjust};
use crate::source::fork::{ForkHub, ForkSource};
use crate::source::{
    Characteristics, Comparator, EmptySource, IterSource, RangeSource, SourceIter, SplitSource,
    VecSource,
};
use crate::stage::reshape::{
    BatchStage, BridgeStage, Bridged, BridgeInput, ConcatStage, GroupByStage, JoinStage,
    MergeStage, SliceStage, SortedStage,
};
use crate::stage::{HeadStage, HeadState, NodeStage, Stage, StageState};

/// A lazy, closeable, parallel-capable pipeline of elements of type `T`.
///
/// Pipelines are single-consumption: deriving a successor, starting a
/// terminal operation, or closing all consume the receiver's stage, and any
/// further use reports it as already consumed.
///
/// ```
/// use flowline::Pipeline;
///
/// let doubled = Pipeline::from_vec(vec![1, 2, 3])
///     .map(|x| x * 2)
///     .to_vec()
///     .unwrap();
/// assert_eq!(doubled, vec![2, 4, 6]);
/// ```
pub struct Pipeline<T: Send + 'static> {
    stage: Arc<dyn Stage<T>>,
}

// ================================
// Construction entry points
// ================================

impl<T: Send + 'static> Pipeline<T> {
    fn from_stage(stage: Arc<dyn Stage<T>>) -> Pipeline<T> {
        Pipeline { stage }
    }

    /// Wrap an existing low-level source as a pipeline.
    pub fn from_source(source: Box<dyn SplitSource<T>>) -> Pipeline<T> {
        let state = StageState::new(Vec::new());
        let head = HeadState::new(false);
        Pipeline::from_stage(Arc::new(HeadStage::eager(state, head, source)))
    }

    /// A pipeline over an owned vector.
    pub fn from_vec(items: Vec<T>) -> Pipeline<T> {
        Pipeline::from_source(Box::new(VecSource::new(items)))
    }

    /// A pipeline over any iterator. The iterator is not consumed until the
    /// pipeline runs.
    pub fn from_iter<I>(iter: I) -> Pipeline<T>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Pipeline::from_source(Box::new(IterSource::new(iter.into_iter())))
    }

    /// A pipeline with no elements.
    pub fn empty() -> Pipeline<T> {
        Pipeline::from_source(Box::new(EmptySource::new()))
    }

    /// A pipeline over a source built only when the pipeline actually
    /// starts, reporting the declared characteristics and size until then.
    pub fn from_supplier(
        supplier: impl FnOnce() -> Box<dyn SplitSource<T>> + Send + 'static,
        chars: Characteristics,
        size: Option<u64>,
    ) -> Pipeline<T> {
        let state = StageState::new(Vec::new());
        let head = HeadState::new(false);
        Pipeline::from_stage(Arc::new(HeadStage::deferred(
            state,
            head,
            Box::new(supplier),
            chars,
            size,
            None,
        )))
    }

    /// Like [`Pipeline::from_supplier`], for a source sorted under an
    /// explicit comparator.
    pub fn from_sorted_supplier(
        supplier: impl FnOnce() -> Box<dyn SplitSource<T>> + Send + 'static,
        chars: Characteristics,
        size: Option<u64>,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Pipeline<T> {
        let state = StageState::new(Vec::new());
        let head = HeadState::new(false);
        Pipeline::from_stage(Arc::new(HeadStage::deferred(
            state,
            head,
            Box::new(supplier),
            chars | Characteristics::SORTED,
            size,
            Some(Arc::new(cmp)),
        )))
    }
}

impl Pipeline<i64> {
    /// A pipeline over a half-open integer range.
    pub fn from_range(range: Range<i64>) -> Pipeline<i64> {
        Pipeline::from_source(Box::new(RangeSource::new(range)))
    }
}

// ================================
// Derivation plumbing
// ================================

impl<T: Send + 'static> Pipeline<T> {
    /// Mark this stage linked and build its successor.
    ///
    /// Panics with "already consumed" when the receiver was previously
    /// linked, started, or closed.
    fn derive<U: Send + 'static>(
        &self,
        build: impl FnOnce(Arc<dyn Stage<T>>, Arc<StageState>, Arc<HeadState>) -> Arc<dyn Stage<U>>,
    ) -> Pipeline<U> {
        if let Err(error) = self.stage.state().mark_linked() {
            panic!("{}", error);
        }
        let state = StageState::new(vec![self.stage.state().clone()]);
        let head = self.stage.head().clone();
        Pipeline::from_stage(build(self.stage.clone(), state, head))
    }

    /// Two-parent derivation for concat/join/merge: links both chains and
    /// cascades start/close into both.
    fn derive_with<O: Send + 'static, U: Send + 'static>(
        &self,
        other: &Pipeline<O>,
        build: impl FnOnce(
            Arc<dyn Stage<T>>,
            Arc<dyn Stage<O>>,
            Arc<StageState>,
            Arc<HeadState>,
        ) -> Arc<dyn Stage<U>>,
    ) -> Pipeline<U> {
        if let Err(error) = self.stage.state().mark_linked() {
            panic!("{}", error);
        }
        if let Err(error) = other.stage.state().mark_linked() {
            panic!("{}", error);
        }
        let state = StageState::new(vec![
            self.stage.state().clone(),
            other.stage.state().clone(),
        ]);
        let head = self.stage.head().clone();
        Pipeline::from_stage(build(self.stage.clone(), other.stage.clone(), state, head))
    }

    fn derive_node<U: Send + 'static>(
        &self,
        factory: NodeFactory<T, U>,
        chars_adjust: CharsAdjust,
        size_adjust: SizeAdjust,
    ) -> Pipeline<U> {
        self.derive(move |prev, state, head| {
            Arc::new(NodeStage::new(
                state,
                head,
                prev,
                factory,
                chars_adjust,
                size_adjust,
            )) as Arc<dyn Stage<U>>
        })
    }
}

// ================================
// Intermediate transformations
// ================================

impl<T: Send + 'static> Pipeline<T> {
    /// Keep only the elements satisfying the predicate. Drops the SIZED
    /// flags: the surviving count is unknown ahead of time.
    pub fn filter(&self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Pipeline<T> {
        let predicate = Arc::new(predicate);
        let factory: NodeFactory<T, T> = Arc::new(move |_parallel| {
            Box::new(FilterNode {
                predicate: predicate.clone(),
            }) as Box<dyn StageNode<T, T>>
        });
        self.derive_node(
            factory,
            Arc::new(|chars: Characteristics| {
                chars.without(Characteristics::SIZED | Characteristics::SUBSIZED)
            }),
            Arc::new(|_size| None),
        )
    }

    /// Transform each element. Conservatively drops SORTED, DISTINCT, and
    /// NONNULL: an arbitrary mapping need not preserve them.
    pub fn map<U: Send + 'static>(
        &self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> Pipeline<U> {
        let f = Arc::new(f);
        let factory: NodeFactory<T, U> = Arc::new(move |_parallel| {
            Box::new(MapNode { f: f.clone() }) as Box<dyn StageNode<T, U>>
        });
        self.derive_node(
            factory,
            Arc::new(|chars: Characteristics| {
                chars.without(
                    Characteristics::SORTED | Characteristics::DISTINCT | Characteristics::NONNULL,
                )
            }),
            Arc::new(|size| size),
        )
    }

    /// Replace each element with a subsequence of outputs.
    pub fn flat_map<U: Send + 'static, I>(
        &self,
        f: impl Fn(T) -> I + Send + Sync + 'static,
    ) -> Pipeline<U>
    where
        I: IntoIterator<Item = U> + 'static,
    {
        let f = Arc::new(f);
        let factory: NodeFactory<T, U> = Arc::new(move |_parallel| {
            Box::new(FlatMapNode { f: f.clone() }) as Box<dyn StageNode<T, U>>
        });
        self.derive_node(
            factory,
            Arc::new(|chars: Characteristics| {
                chars.without(
                    Characteristics::SORTED
                        | Characteristics::DISTINCT
                        | Characteristics::NONNULL
                        | Characteristics::SIZED
                        | Characteristics::SUBSIZED,
                )
            }),
            Arc::new(|_size| None),
        )
    }

    /// Observe each element without changing the pipeline.
    pub fn peek(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Pipeline<T> {
        let observer = Arc::new(observer);
        let factory: NodeFactory<T, T> = Arc::new(move |_parallel| {
            Box::new(PeekNode {
                observer: observer.clone(),
            }) as Box<dyn StageNode<T, T>>
        });
        self.derive_node(
            factory,
            Arc::new(|chars| chars),
            Arc::new(|size| size),
        )
    }

    /// Drop duplicate elements. Under parallel execution every branch shares
    /// one thread-safe seen-set; sequential execution uses a plain set.
    pub fn distinct(&self) -> Pipeline<T>
    where
        T: Eq + Hash + Clone,
    {
        let shared: Arc<Mutex<HashSet<T>>> = Arc::new(Mutex::new(HashSet::new()));
        let factory: NodeFactory<T, T> = Arc::new(move |parallel| {
            if parallel {
                Box::new(DistinctNode::shared(shared.clone())) as Box<dyn StageNode<T, T>>
            } else {
                Box::new(DistinctNode::local()) as Box<dyn StageNode<T, T>>
            }
        });
        self.derive_node(
            factory,
            Arc::new(|chars: Characteristics| {
                chars
                    .with(Characteristics::DISTINCT)
                    .without(Characteristics::SIZED | Characteristics::SUBSIZED)
            }),
            Arc::new(|_size| None),
        )
    }

    /// Release the encounter-order constraint for downstream stages.
    pub fn unordered(&self) -> Pipeline<T> {
        let factory: NodeFactory<T, T> =
            Arc::new(|_parallel| Box::new(IdentityNode) as Box<dyn StageNode<T, T>>);
        self.derive_node(
            factory,
            Arc::new(|chars: Characteristics| chars.without(Characteristics::ORDERED)),
            Arc::new(|size| size),
        )
    }

    /// Sort by natural order. A no-op when the upstream is already sorted
    /// naturally; otherwise the upstream is fully materialized and
    /// stable-sorted when the pipeline starts.
    pub fn sorted(&self) -> Pipeline<T>
    where
        T: Ord,
    {
        let cmp: Arc<Comparator<T>> = Arc::new(|a: &T, b: &T| a.cmp(b));
        self.derive(move |prev, state, head| {
            Arc::new(SortedStage::new(state, head, prev, cmp, true)) as Arc<dyn Stage<T>>
        })
    }

    /// Sort under an explicit comparator, stable.
    pub fn sorted_by(
        &self,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Pipeline<T> {
        let cmp: Arc<Comparator<T>> = Arc::new(cmp);
        self.derive(move |prev, state, head| {
            Arc::new(SortedStage::new(state, head, prev, cmp, false)) as Arc<dyn Stage<T>>
        })
    }

    /// Keep only the first `n` elements in encounter order, exact in both
    /// sequential and parallel modes.
    pub fn limit(&self, n: u64) -> Pipeline<T> {
        self.derive(move |prev, state, head| {
            Arc::new(SliceStage::new(state, head, prev, 0, Some(n))) as Arc<dyn Stage<T>>
        })
    }

    /// Drop the first `n` elements in encounter order.
    pub fn skip(&self, n: u64) -> Pipeline<T> {
        self.derive(move |prev, state, head| {
            Arc::new(SliceStage::new(state, head, prev, n, None)) as Arc<dyn Stage<T>>
        })
    }

    /// Gather elements into contiguous chunks of `size`; the final chunk may
    /// be short.
    pub fn batch(&self, size: usize) -> Pipeline<Vec<T>> {
        assert!(size > 0, "batch size must be non-zero");
        self.derive(move |prev, state, head| {
            Arc::new(BatchStage::new(state, head, prev, size)) as Arc<dyn Stage<Vec<T>>>
        })
    }

    /// Chain another pipeline after this one. Both upstream chains start and
    /// close together.
    pub fn concat(&self, other: Pipeline<T>) -> Pipeline<T> {
        self.derive_with(&other, |first, second, state, head| {
            Arc::new(ConcatStage::new(state, head, first, second)) as Arc<dyn Stage<T>>
        })
    }

    /// Merge this pipeline with another sorted pipeline under natural order.
    pub fn merge_sorted(&self, other: Pipeline<T>) -> Pipeline<T>
    where
        T: Ord,
    {
        let cmp: Arc<Comparator<T>> = Arc::new(|a: &T, b: &T| a.cmp(b));
        self.derive_with(&other, move |left, right, state, head| {
            Arc::new(MergeStage::new(state, head, left, right, cmp, true)) as Arc<dyn Stage<T>>
        })
    }

    /// Merge with another pipeline sorted under the same comparator.
    pub fn merge_sorted_by(
        &self,
        other: Pipeline<T>,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> Pipeline<T> {
        let cmp: Arc<Comparator<T>> = Arc::new(cmp);
        self.derive_with(&other, move |left, right, state, head| {
            Arc::new(MergeStage::new(state, head, left, right, cmp, false)) as Arc<dyn Stage<T>>
        })
    }

    /// Group elements by key into `(key, group)` entries, materializing an
    /// intermediate map when the pipeline starts.
    pub fn group_by<K>(
        &self,
        key: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Pipeline<(K, Vec<T>)>
    where
        K: Eq + Hash + Send + 'static,
    {
        let key: Arc<dyn Fn(&T) -> K + Send + Sync> = Arc::new(key);
        self.derive(move |prev, state, head| {
            Arc::new(GroupByStage::new(state, head, prev, key)) as Arc<dyn Stage<(K, Vec<T>)>>
        })
    }

    /// Inner equi-join with another pipeline: emits a pair for every
    /// left/right combination sharing a key. The right side is materialized
    /// into a keyed map when the pipeline starts.
    pub fn join<R, K>(
        &self,
        other: Pipeline<R>,
        left_key: impl Fn(&T) -> K + Send + Sync + 'static,
        right_key: impl Fn(&R) -> K + Send + Sync + 'static,
    ) -> Pipeline<(T, R)>
    where
        T: Clone,
        R: Clone + Send + 'static,
        K: Eq + Hash + Send + 'static,
    {
        let left_key: Arc<dyn Fn(&T) -> K + Send + Sync> = Arc::new(left_key);
        let right_key: Arc<dyn Fn(&R) -> K + Send + Sync> = Arc::new(right_key);
        self.derive_with(&other, move |left, right, state, head| {
            Arc::new(JoinStage::new(
                state, head, left, right, left_key, right_key,
            )) as Arc<dyn Stage<(T, R)>>
        })
    }

    /// Inject a custom per-element operator: a node factory plus the pure
    /// characteristic and size adjusters composing it into the chain.
    pub fn transform<U: Send + 'static>(
        &self,
        factory: impl Fn(bool) -> Box<dyn StageNode<T, U>> + Send + Sync + 'static,
        chars_adjust: impl Fn(Characteristics) -> Characteristics + Send + Sync + 'static,
        size_adjust: impl Fn(Option<u64>) -> Option<u64> + Send + Sync + 'static,
    ) -> Pipeline<U> {
        self.derive_node(
            Arc::new(factory),
            Arc::new(chars_adjust),
            Arc::new(size_adjust),
        )
    }

    /// Inject a custom non-per-element operator: it receives the upstream as
    /// a deferred view and returns a brand-new sequence or source. The
    /// operator must not start the upstream itself; an operator that drains
    /// its input eagerly is rejected when the pipeline starts.
    pub fn bridge<U: Send + 'static>(
        &self,
        op: impl FnOnce(BridgeInput<T>) -> Bridged<U> + Send + 'static,
    ) -> Pipeline<U> {
        self.derive(move |prev, state, head| {
            Arc::new(BridgeStage::new(state, head, prev, Box::new(op))) as Arc<dyn Stage<U>>
        })
    }

    /// Split this pipeline into `forks` independently consumable pipelines
    /// over the same elements. Each fork sees every element; the shared
    /// upstream is started by whichever fork runs first and closed exactly
    /// once, when the last fork closes.
    pub fn fork(&self, forks: usize) -> Vec<Pipeline<T>>
    where
        T: Clone,
    {
        assert!(forks > 0, "fork requires at least one branch");
        if let Err(error) = self.stage.state().mark_linked() {
            panic!("{}", error);
        }
        let chars = self.stage.characteristics().without(
            Characteristics::SIZED | Characteristics::SUBSIZED | Characteristics::SORTED,
        );
        let upstream = self.stage.clone();
        let upstream_state = self.stage.state().clone();
        let hub = ForkHub::new(
            forks,
            Box::new(move || {
                upstream.state().force_start();
                match upstream.output_source() {
                    Ok(source) => source,
                    Err(error) => {
                        log::error!("fork upstream failed to materialize: {}", error);
                        Box::new(EmptySource::new())
                    }
                }
            }),
            Box::new(move || upstream_state.close()),
        );
        (0..forks)
            .map(|index| {
                let state = StageState::new(Vec::new());
                let release_hub = hub.clone();
                state
                    .add_hook(Box::new(move || {
                        release_hub.release().map_err(|e| Box::new(e) as BoxError)
                    }))
                    .expect("fresh fork stage accepts close hooks");
                let source_hub = hub.clone();
                let supplier = Box::new(move || {
                    Box::new(ForkSource::new(source_hub, index, chars)) as Box<dyn SplitSource<T>>
                });
                let head = HeadState::new(false);
                Pipeline::from_stage(Arc::new(HeadStage::deferred(
                    state, head, supplier, chars, None, None,
                )))
            })
            .collect()
    }
}

// ================================
// Mode toggles and introspection
// ================================

impl<T: Send + 'static> Pipeline<T> {
    fn guard_unconsumed(&self) {
        let state = self.stage.state();
        if state.is_linked() || state.is_started() || state.is_closed() {
            panic!("{}", crate::error::PipelineError::AlreadyConsumed);
        }
    }

    /// Execute terminal operations with parallel decomposition.
    pub fn parallel(self) -> Pipeline<T> {
        self.guard_unconsumed();
        self.stage.head().set_parallel(true);
        self
    }

    /// Parallel execution under explicit tuning.
    pub fn parallel_with(self, config: ExecConfig) -> Pipeline<T> {
        self.guard_unconsumed();
        self.stage.head().set_exec(config);
        self.stage.head().set_parallel(true);
        self
    }

    /// Execute terminal operations on the calling thread.
    pub fn sequential(self) -> Pipeline<T> {
        self.guard_unconsumed();
        self.stage.head().set_parallel(false);
        self
    }

    /// Whether terminal operations will decompose in parallel.
    pub fn is_parallel(&self) -> bool {
        self.stage.head().is_parallel()
    }

    /// The chain's effective characteristics, recomputed on each call.
    pub fn characteristics(&self) -> Characteristics {
        self.stage.characteristics()
    }

    /// The chain's effective size estimate, recomputed on each call.
    pub fn estimate_size(&self) -> Option<u64> {
        self.stage.estimate_size()
    }
}

// ================================
// Lifecycle
// ================================

impl<T: Send + 'static> Pipeline<T> {
    /// Register a hook to run when the pipeline closes. Hooks run in
    /// registration order; failures are aggregated, first primary, rest
    /// suppressed.
    pub fn on_close(
        self,
        hook: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) -> PipelineResult<Pipeline<T>> {
        self.stage.state().add_hook(Box::new(hook))?;
        Ok(self)
    }

    /// Close the pipeline, running every registered hook exactly once and
    /// cascading through the upstream chain. Idempotent.
    pub fn close(&self) -> PipelineResult<()> {
        self.stage.state().close()
    }
}

impl<T: Send + 'static> Drop for Pipeline<T> {
    fn drop(&mut self) {
        let state = self.stage.state();
        // Linked stages are closed by their successor's cascade; started
        // stages are closed by the engine, an iterator, or an explicit
        // close. Only an unused handle still owns its teardown.
        if state.is_linked() || state.is_started() {
            return;
        }
        if let Err(error) = state.close() {
            log::warn!("pipeline close on drop failed: {}", error);
        }
    }
}

// ================================
// Terminal operations
// ================================

impl<T: Send + 'static> Pipeline<T> {
    /// Run the chain against an arbitrary reduction description.
    pub fn collect<A: Send + 'static, R>(&self, reduction: Reduction<T, A, R>) -> PipelineResult<R> {
        engine::execute(&self.stage, &reduction)
    }

    /// The number of elements.
    pub fn count(&self) -> PipelineResult<u64> {
        self.collect(reduce::count())
    }

    /// Collect into a vector, preserving encounter order when ORDERED holds.
    pub fn to_vec(&self) -> PipelineResult<Vec<T>> {
        self.collect(reduce::to_vec())
    }

    /// Apply an action to every element. Under parallel execution the action
    /// runs concurrently across branches.
    pub fn for_each(&self, action: impl Fn(T) + Send + Sync + 'static) -> PipelineResult<()> {
        self.collect(
            Reduction::new(|| (), move |_acc, item| action(item), |_a, _b| (), |_acc| ())
                .concurrent(),
        )
    }

    /// General fold: fresh accumulator per branch, merged pairwise.
    pub fn fold<A: Send + 'static>(
        &self,
        supply: impl Fn() -> A + Send + Sync + 'static,
        accumulate: impl Fn(&mut A, T) + Send + Sync + 'static,
        combine: impl Fn(A, A) -> A + Send + Sync + 'static,
    ) -> PipelineResult<A> {
        self.collect(Reduction::new(supply, accumulate, combine, |acc| acc))
    }

    /// Reduce pairwise with an associative operation; `None` when empty.
    pub fn reduce_with(
        &self,
        op: impl Fn(T, T) -> T + Send + Sync + 'static,
    ) -> PipelineResult<Option<T>> {
        self.collect(reduce::reduce_with(op))
    }

    /// The minimum element under natural order.
    pub fn min(&self) -> PipelineResult<Option<T>>
    where
        T: Ord,
    {
        self.min_by(|a, b| a.cmp(b))
    }

    /// The minimum element under a comparator; ties keep the earlier.
    pub fn min_by(
        &self,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> PipelineResult<Option<T>> {
        self.collect(reduce::extreme_by(Arc::new(cmp), false))
    }

    /// The maximum element under natural order.
    pub fn max(&self) -> PipelineResult<Option<T>>
    where
        T: Ord,
    {
        self.max_by(|a, b| a.cmp(b))
    }

    /// The maximum element under a comparator; ties keep the earlier.
    pub fn max_by(
        &self,
        cmp: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> PipelineResult<Option<T>> {
        self.collect(reduce::extreme_by(Arc::new(cmp), true))
    }

    /// True once any element matches; short-circuits cooperatively.
    pub fn any_match(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> PipelineResult<bool> {
        self.collect(reduce::any_match(predicate))
    }

    /// True when every element matches; short-circuits on the first miss.
    pub fn all_match(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> PipelineResult<bool> {
        self.collect(reduce::all_match(predicate))
    }

    /// True when no element matches.
    pub fn none_match(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> PipelineResult<bool> {
        self.collect(reduce::all_match(move |item| !predicate(item)))
    }

    /// The first element in encounter order.
    pub fn find_first(&self) -> PipelineResult<Option<T>> {
        self.collect(reduce::find_first())
    }

    /// Any element; under parallel execution the first branch to find one
    /// cancels the rest.
    pub fn find_any(&self) -> PipelineResult<Option<T>> {
        self.collect(reduce::find_any())
    }

    /// Consume the pipeline as a lazy iterator. The chain closes when the
    /// iterator drops (or via [`PipelineIter::close`]).
    pub fn iter(self) -> PipelineResult<PipelineIter<T>> {
        self.stage.state().begin()?;
        match self.stage.output_source() {
            Ok(source) => Ok(PipelineIter {
                iter: SourceIter::new(source),
                state: self.stage.state().clone(),
            }),
            Err(error) => {
                if let Err(close_error) = self.stage.state().close() {
                    log::warn!("pipeline close after failed start: {}", close_error);
                }
                Err(error)
            }
        }
    }

    /// Low-level escape hatch: start the chain and expose its output view.
    /// The caller keeps responsibility for closing the pipeline.
    pub fn split_source(&self) -> PipelineResult<Box<dyn SplitSource<T>>> {
        self.stage.state().begin()?;
        self.stage.output_source()
    }
}

/// Lazy iterator over a started pipeline; closes the chain on drop.
pub struct PipelineIter<T> {
    iter: SourceIter<T>,
    state: Arc<StageState>,
}

impl<T> PipelineIter<T> {
    /// Close the underlying chain now instead of at drop.
    pub fn close(&self) -> PipelineResult<()> {
        self.state.close()
    }
}

impl<T> Iterator for PipelineIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl<T> Drop for PipelineIter<T> {
    fn drop(&mut self) {
        if let Err(error) = self.state.close() {
            log::warn!("pipeline close on iterator drop failed: {}", error);
        }
    }
}
