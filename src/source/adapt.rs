//! Source adapters: per-stage node adaptation, concatenation, and sorted
//! merging

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use super::core::{Characteristics, Comparator, SplitSource};
use crate::node::{NodeFactory, StageNode};

/// Pure adjustment of a predecessor's characteristics into a stage's own.
pub type CharsAdjust = Arc<dyn Fn(Characteristics) -> Characteristics + Send + Sync>;
/// Pure adjustment of a predecessor's size estimate into a stage's own.
pub type SizeAdjust = Arc<dyn Fn(Option<u64>) -> Option<u64> + Send + Sync>;

/// A view of an upstream source through one stage's node: pulls upstream
/// elements and re-emits the node's outputs, buffering when a node produces
/// more than one output per input.
///
/// Splitting delegates to the upstream source and wraps the carved prefix
/// with a fresh node from the factory, so each branch owns its node state.
pub struct NodeSource<In, Out> {
    inner: Box<dyn SplitSource<In>>,
    node: Box<dyn StageNode<In, Out>>,
    factory: NodeFactory<In, Out>,
    parallel: bool,
    pending: VecDeque<Out>,
    exhausted: bool,
    chars_adjust: CharsAdjust,
    size_adjust: SizeAdjust,
}

impl<In, Out> NodeSource<In, Out> {
    pub fn new(
        inner: Box<dyn SplitSource<In>>,
        factory: NodeFactory<In, Out>,
        parallel: bool,
        chars_adjust: CharsAdjust,
        size_adjust: SizeAdjust,
    ) -> NodeSource<In, Out> {
        let node = (*factory)(parallel);
        NodeSource {
            inner,
            node,
            factory,
            parallel,
            pending: VecDeque::new(),
            exhausted: false,
            chars_adjust,
            size_adjust,
        }
    }
}

impl<In, Out> SplitSource<Out> for NodeSource<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn try_advance(&mut self, sink: &mut dyn FnMut(Out)) -> bool {
        loop {
            if let Some(item) = self.pending.pop_front() {
                sink(item);
                return true;
            }
            if self.exhausted {
                return false;
            }
            let NodeSource {
                inner,
                node,
                pending,
                ..
            } = self;
            let advanced =
                inner.try_advance(&mut |item| node.apply(item, &mut |out| pending.push_back(out)));
            if !advanced {
                node.finish(&mut |out| pending.push_back(out));
                self.exhausted = true;
            }
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<Out>>> {
        // Buffered outputs precede everything not yet pulled; carving a
        // prefix while the buffer is non-empty would reorder them.
        if self.exhausted || !self.pending.is_empty() {
            return None;
        }
        let prefix = self.inner.try_split()?;
        Some(Box::new(NodeSource::new(
            prefix,
            self.factory.clone(),
            self.parallel,
            self.chars_adjust.clone(),
            self.size_adjust.clone(),
        )))
    }

    fn estimate_size(&self) -> Option<u64> {
        (*self.size_adjust)(self.inner.estimate_size())
            .map(|n| n.saturating_add(self.pending.len() as u64))
    }

    fn characteristics(&self) -> Characteristics {
        (*self.chars_adjust)(self.inner.characteristics())
    }

    fn comparator(&self) -> Option<Arc<Comparator<Out>>> {
        None
    }
}

/// Concatenation of two sources: exhausts the first, then the second.
/// Splits by detaching the entire first half as the prefix.
pub struct ChainSource<T> {
    first: Option<Box<dyn SplitSource<T>>>,
    second: Box<dyn SplitSource<T>>,
}

impl<T> ChainSource<T> {
    pub fn new(first: Box<dyn SplitSource<T>>, second: Box<dyn SplitSource<T>>) -> ChainSource<T> {
        ChainSource {
            first: Some(first),
            second,
        }
    }
}

impl<T: Send + 'static> SplitSource<T> for ChainSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        if let Some(first) = &mut self.first {
            if first.try_advance(sink) {
                return true;
            }
            self.first = None;
        }
        self.second.try_advance(sink)
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        match self.first.take() {
            Some(first) => Some(first),
            None => self.second.try_split(),
        }
    }

    fn estimate_size(&self) -> Option<u64> {
        let first = match &self.first {
            Some(first) => first.estimate_size()?,
            None => 0,
        };
        self.second
            .estimate_size()
            .map(|second| first.saturating_add(second))
    }

    fn characteristics(&self) -> Characteristics {
        match &self.first {
            Some(first) => (first.characteristics() & self.second.characteristics())
                .without(Characteristics::DISTINCT | Characteristics::SORTED),
            None => self.second.characteristics(),
        }
    }
}

/// Order-preserving merge of two sorted sources under one comparator, with
/// single-element lookahead per side. Unsplittable.
pub struct MergeSource<T> {
    left: Box<dyn SplitSource<T>>,
    right: Box<dyn SplitSource<T>>,
    peek_left: Option<T>,
    peek_right: Option<T>,
    cmp: Arc<Comparator<T>>,
    natural: bool,
}

impl<T> MergeSource<T> {
    pub fn new(
        left: Box<dyn SplitSource<T>>,
        right: Box<dyn SplitSource<T>>,
        cmp: Arc<Comparator<T>>,
        natural: bool,
    ) -> MergeSource<T> {
        MergeSource {
            left,
            right,
            peek_left: None,
            peek_right: None,
            cmp,
            natural,
        }
    }

    fn refill(&mut self) {
        if self.peek_left.is_none() {
            let slot = &mut self.peek_left;
            self.left.try_advance(&mut |item| *slot = Some(item));
        }
        if self.peek_right.is_none() {
            let slot = &mut self.peek_right;
            self.right.try_advance(&mut |item| *slot = Some(item));
        }
    }
}

impl<T: Send + 'static> SplitSource<T> for MergeSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        self.refill();
        let take_left = match (&self.peek_left, &self.peek_right) {
            (None, None) => return false,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            // Ties favor the left side, keeping the merge stable.
            (Some(left), Some(right)) => (*self.cmp)(left, right) != Ordering::Greater,
        };
        let item = if take_left {
            self.peek_left.take()
        } else {
            self.peek_right.take()
        };
        match item {
            Some(item) => {
                sink(item);
                true
            }
            None => false,
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        None
    }

    fn estimate_size(&self) -> Option<u64> {
        let buffered = self.peek_left.is_some() as u64 + self.peek_right.is_some() as u64;
        let left = self.left.estimate_size()?;
        let right = self.right.estimate_size()?;
        Some(left.saturating_add(right).saturating_add(buffered))
    }

    fn characteristics(&self) -> Characteristics {
        let mut chars = Characteristics::ORDERED | Characteristics::SORTED;
        if self.left.estimate_size().is_some() && self.right.estimate_size().is_some() {
            chars |= Characteristics::SIZED;
        }
        chars
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        if self.natural {
            None
        } else {
            Some(self.cmp.clone())
        }
    }
}
