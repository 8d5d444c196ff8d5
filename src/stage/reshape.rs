//! Reshaping stages
//!
//! Transforms that cannot run as a pure per-element pull: they drain the
//! upstream fully or partially into a new concrete source when the chain
//! starts, then expose the materialized result as a fresh head-like view.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::core::{HeadState, Stage};
use super::state::StageState;
use crate::error::{PipelineError, PipelineResult};
use crate::source::{
    ChainSource, Characteristics, Comparator, EmptySource, IterSource, MergeSource, SourceIter,
    SplitSource, VecSource,
};

/// Fully drains the upstream, stable-sorts it, and re-exposes the sorted
/// data as a sized, sorted source. Skipped entirely when the upstream is
/// already sorted by natural order and no explicit comparator was given.
pub(crate) struct SortedStage<T: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<T>>,
    cmp: Arc<Comparator<T>>,
    natural: bool,
}

impl<T: Send + 'static> SortedStage<T> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<T>>,
        cmp: Arc<Comparator<T>>,
        natural: bool,
    ) -> SortedStage<T> {
        SortedStage {
            state,
            head,
            prev,
            cmp,
            natural,
        }
    }
}

impl<T: Send + 'static> Stage<T> for SortedStage<T> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<T>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let prev_chars = self.prev.characteristics();
        let mut source = self.prev.output_source()?;
        if self.natural
            && prev_chars.contains(Characteristics::SORTED)
            && self.prev.comparator().is_none()
        {
            return Ok(source);
        }
        let mut buf = Vec::new();
        source.for_each_remaining(&mut |item| buf.push(item));
        let cmp = &*self.cmp;
        buf.sort_by(|a, b| cmp(a, b));
        let extra = (prev_chars & (Characteristics::DISTINCT | Characteristics::NONNULL))
            | Characteristics::SORTED;
        let report = if self.natural {
            None
        } else {
            Some(self.cmp.clone())
        };
        Ok(Box::new(VecSource::with_characteristics(buf, extra, report)))
    }

    fn characteristics(&self) -> Characteristics {
        self.prev.characteristics() | Characteristics::SORTED | Characteristics::ORDERED
    }

    fn estimate_size(&self) -> Option<u64> {
        self.prev.estimate_size()
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        if self.natural {
            None
        } else {
            Some(self.cmp.clone())
        }
    }
}

/// limit/skip with ordering correction: drains exactly the elements the
/// slice needs in encounter order before any splitting can happen, trading
/// structural parallelism for exactness of the first/last N elements.
pub(crate) struct SliceStage<T: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<T>>,
    skip: u64,
    limit: Option<u64>,
}

impl<T: Send + 'static> SliceStage<T> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<T>>,
        skip: u64,
        limit: Option<u64>,
    ) -> SliceStage<T> {
        SliceStage {
            state,
            head,
            prev,
            skip,
            limit,
        }
    }
}

impl<T: Send + 'static> Stage<T> for SliceStage<T> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<T>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let prev_chars = self.prev.characteristics();
        let mut source = self.prev.output_source()?;
        let mut kept: Vec<T> = Vec::new();
        let mut to_skip = self.skip;
        loop {
            if let Some(limit) = self.limit {
                if kept.len() as u64 >= limit {
                    break;
                }
            }
            let advanced = source.try_advance(&mut |item| {
                if to_skip > 0 {
                    to_skip -= 1;
                } else {
                    kept.push(item);
                }
            });
            if !advanced {
                break;
            }
        }
        let extra = prev_chars
            & (Characteristics::SORTED | Characteristics::DISTINCT | Characteristics::NONNULL);
        Ok(Box::new(VecSource::with_characteristics(
            kept,
            extra,
            self.prev.comparator(),
        )))
    }

    fn characteristics(&self) -> Characteristics {
        self.prev.characteristics()
    }

    fn estimate_size(&self) -> Option<u64> {
        self.prev.estimate_size().map(|n| {
            let after_skip = n.saturating_sub(self.skip);
            match self.limit {
                Some(limit) => after_skip.min(limit),
                None => after_skip,
            }
        })
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        self.prev.comparator()
    }
}

/// Drains the upstream into contiguous chunks of a fixed size (the final
/// chunk may be short) and re-exposes the chunks as a sized source.
pub(crate) struct BatchStage<T: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<T>>,
    size: usize,
}

impl<T: Send + 'static> BatchStage<T> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<T>>,
        size: usize,
    ) -> BatchStage<T> {
        BatchStage {
            state,
            head,
            prev,
            size,
        }
    }
}

impl<T: Send + 'static> Stage<Vec<T>> for BatchStage<T> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<Vec<T>>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let mut source = self.prev.output_source()?;
        let mut chunks: Vec<Vec<T>> = Vec::new();
        let mut current = Vec::with_capacity(self.size);
        source.for_each_remaining(&mut |item| {
            current.push(item);
            if current.len() == self.size {
                chunks.push(std::mem::take(&mut current));
            }
        });
        if !current.is_empty() {
            chunks.push(current);
        }
        Ok(Box::new(VecSource::new(chunks)))
    }

    fn characteristics(&self) -> Characteristics {
        let prev = self.prev.characteristics();
        let mut chars = prev & Characteristics::ORDERED;
        if prev.contains(Characteristics::SIZED) {
            chars |= Characteristics::SIZED | Characteristics::SUBSIZED;
        }
        chars
    }

    fn estimate_size(&self) -> Option<u64> {
        let size = self.size as u64;
        self.prev
            .estimate_size()
            .map(|n| n.div_ceil(size.max(1)))
    }
}

/// Drains the upstream into a keyed map and re-exposes the `(key, group)`
/// entries. Keys are distinct; encounter order is not preserved.
pub(crate) struct GroupByStage<T, K> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<T>>,
    key: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<T, K> GroupByStage<T, K>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<T>>,
        key: Arc<dyn Fn(&T) -> K + Send + Sync>,
    ) -> GroupByStage<T, K> {
        GroupByStage {
            state,
            head,
            prev,
            key,
        }
    }
}

impl<T, K> Stage<(K, Vec<T>)> for GroupByStage<T, K>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<(K, Vec<T>)>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let mut source = self.prev.output_source()?;
        let mut groups: HashMap<K, Vec<T>> = HashMap::new();
        let key = &*self.key;
        source.for_each_remaining(&mut |item| {
            groups.entry(key(&item)).or_default().push(item);
        });
        let entries: Vec<(K, Vec<T>)> = groups.into_iter().collect();
        Ok(Box::new(VecSource::with_characteristics(
            entries,
            Characteristics::DISTINCT,
            None,
        )))
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::DISTINCT
    }

    fn estimate_size(&self) -> Option<u64> {
        None
    }
}

/// Inner equi-join: drains the right pipeline into a keyed map, then drains
/// the left pipeline emitting a pair for every key match.
pub(crate) struct JoinStage<L, R, K> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    left: Arc<dyn Stage<L>>,
    right: Arc<dyn Stage<R>>,
    left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
}

impl<L, R, K> JoinStage<L, R, K>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        left: Arc<dyn Stage<L>>,
        right: Arc<dyn Stage<R>>,
        left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
        right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
    ) -> JoinStage<L, R, K> {
        JoinStage {
            state,
            head,
            left,
            right,
            left_key,
            right_key,
        }
    }
}

impl<L, R, K> Stage<(L, R)> for JoinStage<L, R, K>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
{
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<(L, R)>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let mut right_source = self.right.output_source()?;
        let mut table: HashMap<K, Vec<R>> = HashMap::new();
        let right_key = &*self.right_key;
        right_source.for_each_remaining(&mut |item| {
            table.entry(right_key(&item)).or_default().push(item);
        });
        let mut left_source = self.left.output_source()?;
        let mut pairs: Vec<(L, R)> = Vec::new();
        let left_key = &*self.left_key;
        left_source.for_each_remaining(&mut |item| {
            if let Some(matches) = table.get(&left_key(&item)) {
                for matched in matches {
                    pairs.push((item.clone(), matched.clone()));
                }
            }
        });
        Ok(Box::new(VecSource::new(pairs)))
    }

    fn characteristics(&self) -> Characteristics {
        self.left.characteristics() & Characteristics::ORDERED
    }

    fn estimate_size(&self) -> Option<u64> {
        None
    }
}

/// Lazily chains a second pipeline after the first; both upstream chains
/// participate in the start and close cascades.
pub(crate) struct ConcatStage<T: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    first: Arc<dyn Stage<T>>,
    second: Arc<dyn Stage<T>>,
}

impl<T: Send + 'static> ConcatStage<T> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        first: Arc<dyn Stage<T>>,
        second: Arc<dyn Stage<T>>,
    ) -> ConcatStage<T> {
        ConcatStage {
            state,
            head,
            first,
            second,
        }
    }
}

impl<T: Send + 'static> Stage<T> for ConcatStage<T> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<T>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        Ok(Box::new(ChainSource::new(
            self.first.output_source()?,
            self.second.output_source()?,
        )))
    }

    fn characteristics(&self) -> Characteristics {
        (self.first.characteristics() & self.second.characteristics())
            .without(Characteristics::DISTINCT | Characteristics::SORTED)
    }

    fn estimate_size(&self) -> Option<u64> {
        let first = self.first.estimate_size()?;
        let second = self.second.estimate_size()?;
        Some(first.saturating_add(second))
    }
}

/// Lazily merges two sorted pipelines under one comparator.
pub(crate) struct MergeStage<T: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    left: Arc<dyn Stage<T>>,
    right: Arc<dyn Stage<T>>,
    cmp: Arc<Comparator<T>>,
    natural: bool,
}

impl<T: Send + 'static> MergeStage<T> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        left: Arc<dyn Stage<T>>,
        right: Arc<dyn Stage<T>>,
        cmp: Arc<Comparator<T>>,
        natural: bool,
    ) -> MergeStage<T> {
        MergeStage {
            state,
            head,
            left,
            right,
            cmp,
            natural,
        }
    }
}

impl<T: Send + 'static> Stage<T> for MergeStage<T> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<T>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        Ok(Box::new(MergeSource::new(
            self.left.output_source()?,
            self.right.output_source()?,
            self.cmp.clone(),
            self.natural,
        )))
    }

    fn characteristics(&self) -> Characteristics {
        let mut chars = Characteristics::ORDERED | Characteristics::SORTED;
        if self.left.estimate_size().is_some() && self.right.estimate_size().is_some() {
            chars |= Characteristics::SIZED;
        }
        chars
    }

    fn estimate_size(&self) -> Option<u64> {
        let left = self.left.estimate_size()?;
        let right = self.right.estimate_size()?;
        Some(left.saturating_add(right))
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        if self.natural {
            None
        } else {
            Some(self.cmp.clone())
        }
    }
}

/// The alternative representation a bridge operator hands back: either a
/// brand-new sequence or a brand-new low-level source.
pub enum Bridged<T> {
    Sequence(Box<dyn Iterator<Item = T> + Send>),
    Source(Box<dyn SplitSource<T>>),
}

/// The upstream view handed to a bridge operator. Every accessor is
/// deferred: the upstream chain is not started until the representation the
/// operator returns is first pulled. An operator that drains the input
/// inside its own body is detected and rejected.
pub struct BridgeInput<T: Send + 'static> {
    stage: Arc<dyn Stage<T>>,
    tripwire: Arc<AtomicBool>,
}

impl<T: Send + 'static> BridgeInput<T> {
    pub fn characteristics(&self) -> Characteristics {
        self.stage.characteristics()
    }

    pub fn estimate_size(&self) -> Option<u64> {
        self.stage.estimate_size()
    }

    /// The upstream as a deferred source, safe to embed in the returned
    /// representation.
    pub fn into_source(self) -> Box<dyn SplitSource<T>> {
        Box::new(LazyStageSource {
            stage: self.stage,
            inner: None,
            tripwire: self.tripwire,
        })
    }

    /// The upstream as a deferred iterator.
    pub fn into_sequence(self) -> SourceIter<T> {
        SourceIter::new(self.into_source())
    }
}

/// Deferred view over an upstream stage: materializes the stage's output
/// view on first pull, tripping the bridge tripwire when it does.
struct LazyStageSource<T: Send + 'static> {
    stage: Arc<dyn Stage<T>>,
    inner: Option<Box<dyn SplitSource<T>>>,
    tripwire: Arc<AtomicBool>,
}

impl<T: Send + 'static> LazyStageSource<T> {
    fn force(&mut self) -> &mut dyn SplitSource<T> {
        if self.inner.is_none() {
            self.tripwire.store(true, Ordering::SeqCst);
            self.stage.state().force_start();
            let source = match self.stage.output_source() {
                Ok(source) => source,
                Err(error) => {
                    log::error!("bridge input failed to materialize: {}", error);
                    Box::new(EmptySource::new())
                }
            };
            self.inner = Some(source);
        }
        self.inner
            .as_mut()
            .expect("bridge input just materialized")
            .as_mut()
    }
}

impl<T: Send + 'static> SplitSource<T> for LazyStageSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        self.force().try_advance(sink)
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        self.force().try_split()
    }

    fn estimate_size(&self) -> Option<u64> {
        match &self.inner {
            Some(inner) => inner.estimate_size(),
            None => self.stage.estimate_size(),
        }
    }

    fn characteristics(&self) -> Characteristics {
        match &self.inner {
            Some(inner) => inner.characteristics(),
            None => self.stage.characteristics(),
        }
    }
}

type BridgeOp<In, Out> = Box<dyn FnOnce(BridgeInput<In>) -> Bridged<Out> + Send>;

/// Replaces the upstream's accessor with an alternative representation
/// supplied by an external operator, invoked lazily when the chain starts.
/// The operator must not itself start the upstream; doing so is detected
/// when the operator returns and raised as a contract violation.
pub(crate) struct BridgeStage<In: Send + 'static, Out: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<In>>,
    op: Mutex<Option<BridgeOp<In, Out>>>,
}

impl<In: Send + 'static, Out: Send + 'static> BridgeStage<In, Out> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<In>>,
        op: BridgeOp<In, Out>,
    ) -> BridgeStage<In, Out> {
        BridgeStage {
            state,
            head,
            prev,
            op: Mutex::new(Some(op)),
        }
    }
}

impl<In: Send + 'static, Out: Send + 'static> Stage<Out> for BridgeStage<In, Out> {
    fn state(&self) -> &Arc<StageState> {
        &self.state
    }

    fn head(&self) -> &Arc<HeadState> {
        &self.head
    }

    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<Out>>> {
        if self.state.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        let op = self
            .op
            .lock()
            .expect("bridge operator lock poisoned")
            .take()
            .ok_or(PipelineError::AlreadyConsumed)?;
        let tripwire = Arc::new(AtomicBool::new(false));
        let input = BridgeInput {
            stage: self.prev.clone(),
            tripwire: tripwire.clone(),
        };
        let bridged = op(input);
        if tripwire.load(Ordering::SeqCst) {
            return Err(PipelineError::OperatorStartedPipeline);
        }
        match bridged {
            Bridged::Sequence(iter) => Ok(Box::new(IterSource::new(iter))),
            Bridged::Source(source) => Ok(source),
        }
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::empty()
    }

    fn estimate_size(&self) -> Option<u64> {
        None
    }
}
