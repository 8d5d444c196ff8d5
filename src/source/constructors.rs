//! Concrete splittable sources: vectors, ranges, iterators, deferred
//! suppliers, and the empty source

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use super::core::{Characteristics, Comparator, SplitSource};

/// Initial batch carved off an iterator-backed source; grows arithmetically
/// on each subsequent split.
const BATCH_UNIT: usize = 1 << 10;
/// Upper bound on a single carved batch.
const MAX_BATCH: usize = 1 << 25;

/// A source over an owned vector of elements. Splits in half, prefix first.
pub struct VecSource<T> {
    items: VecDeque<T>,
    chars: Characteristics,
    cmp: Option<Arc<Comparator<T>>>,
}

impl<T> VecSource<T> {
    pub fn new(items: Vec<T>) -> VecSource<T> {
        VecSource::with_characteristics(items, Characteristics::empty(), None)
    }

    /// Build a vector source carrying extra characteristic flags (for
    /// materialized sorted or keyed data) and an optional comparator.
    pub fn with_characteristics(
        items: Vec<T>,
        extra: Characteristics,
        cmp: Option<Arc<Comparator<T>>>,
    ) -> VecSource<T> {
        let base = Characteristics::ORDERED
            | Characteristics::SIZED
            | Characteristics::SUBSIZED
            | Characteristics::IMMUTABLE;
        VecSource {
            items: VecDeque::from(items),
            chars: base | extra,
            cmp,
        }
    }
}

impl<T: Send + 'static> SplitSource<T> for VecSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        match self.items.pop_front() {
            Some(item) => {
                sink(item);
                true
            }
            None => false,
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        let len = self.items.len();
        if len < 2 {
            return None;
        }
        let prefix: Vec<T> = self.items.drain(..len / 2).collect();
        Some(Box::new(VecSource {
            items: VecDeque::from(prefix),
            chars: self.chars,
            cmp: self.cmp.clone(),
        }))
    }

    fn estimate_size(&self) -> Option<u64> {
        Some(self.items.len() as u64)
    }

    fn characteristics(&self) -> Characteristics {
        self.chars
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        self.cmp.clone()
    }
}

/// A source over a half-open `i64` range. Splits at the midpoint.
pub struct RangeSource {
    next: i64,
    end: i64,
}

impl RangeSource {
    pub fn new(range: std::ops::Range<i64>) -> RangeSource {
        RangeSource {
            next: range.start,
            end: range.end.max(range.start),
        }
    }
}

impl SplitSource<i64> for RangeSource {
    fn try_advance(&mut self, sink: &mut dyn FnMut(i64)) -> bool {
        if self.next < self.end {
            let value = self.next;
            self.next += 1;
            sink(value);
            true
        } else {
            false
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<i64>>> {
        let len = (self.end - self.next) as u64;
        if len < 2 {
            return None;
        }
        let mid = self.next + (len / 2) as i64;
        let prefix = RangeSource {
            next: self.next,
            end: mid,
        };
        self.next = mid;
        Some(Box::new(prefix))
    }

    fn estimate_size(&self) -> Option<u64> {
        Some((self.end - self.next) as u64)
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::ORDERED
            | Characteristics::SIZED
            | Characteristics::SUBSIZED
            | Characteristics::SORTED
            | Characteristics::DISTINCT
            | Characteristics::NONNULL
            | Characteristics::IMMUTABLE
    }
}

/// A source over an arbitrary iterator. The remaining size is taken from the
/// iterator's hint when exact; splits carve a growing prefix batch into a
/// vector source so encounter order is preserved across the split.
pub struct IterSource<I: Iterator> {
    iter: I,
    batch: usize,
}

impl<I: Iterator> IterSource<I> {
    pub fn new(iter: I) -> IterSource<I> {
        IterSource {
            iter,
            batch: BATCH_UNIT,
        }
    }

    fn exact_size(&self) -> Option<u64> {
        let (lower, upper) = self.iter.size_hint();
        match upper {
            Some(upper) if upper == lower => Some(lower as u64),
            _ => None,
        }
    }
}

impl<I> SplitSource<I::Item> for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    fn try_advance(&mut self, sink: &mut dyn FnMut(I::Item)) -> bool {
        match self.iter.next() {
            Some(item) => {
                sink(item);
                true
            }
            None => false,
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<I::Item>>> {
        let mut batch = Vec::with_capacity(self.batch.min(BATCH_UNIT * 4));
        while batch.len() < self.batch {
            match self.iter.next() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if batch.is_empty() {
            return None;
        }
        self.batch = (self.batch + BATCH_UNIT).min(MAX_BATCH);
        Some(Box::new(VecSource::new(batch)))
    }

    fn estimate_size(&self) -> Option<u64> {
        self.exact_size()
    }

    fn characteristics(&self) -> Characteristics {
        let mut chars = Characteristics::ORDERED | Characteristics::IMMUTABLE;
        if self.exact_size().is_some() {
            chars |= Characteristics::SIZED | Characteristics::SUBSIZED;
        }
        chars
    }
}

/// A source with no elements.
pub struct EmptySource<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> EmptySource<T> {
    pub fn new() -> EmptySource<T> {
        EmptySource {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for EmptySource<T> {
    fn default() -> Self {
        EmptySource::new()
    }
}

impl<T: Send + 'static> SplitSource<T> for EmptySource<T> {
    fn try_advance(&mut self, _sink: &mut dyn FnMut(T)) -> bool {
        false
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        None
    }

    fn estimate_size(&self) -> Option<u64> {
        Some(0)
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::SIZED | Characteristics::SUBSIZED
    }
}

type SourceSupplier<T> = Box<dyn FnOnce() -> Box<dyn SplitSource<T>> + Send>;

/// A source materialized from a supplier on first use, so an expensive
/// underlying source is not built until the pipeline actually runs.
///
/// Until materialization it reports the characteristics, size estimate, and
/// comparator it was declared with.
pub struct DeferredSource<T> {
    supplier: Option<SourceSupplier<T>>,
    inner: Option<Box<dyn SplitSource<T>>>,
    declared: Characteristics,
    declared_size: Option<u64>,
    cmp: Option<Arc<Comparator<T>>>,
}

impl<T: Send + 'static> DeferredSource<T> {
    pub fn new(
        supplier: SourceSupplier<T>,
        declared: Characteristics,
        declared_size: Option<u64>,
        cmp: Option<Arc<Comparator<T>>>,
    ) -> DeferredSource<T> {
        DeferredSource {
            supplier: Some(supplier),
            inner: None,
            declared,
            declared_size,
            cmp,
        }
    }

    fn force(&mut self) -> &mut dyn SplitSource<T> {
        if self.inner.is_none() {
            let supplier = self
                .supplier
                .take()
                .expect("deferred source supplier consumed without materializing");
            self.inner = Some(supplier());
        }
        self.inner
            .as_mut()
            .expect("deferred source just materialized")
            .as_mut()
    }
}

impl<T: Send + 'static> SplitSource<T> for DeferredSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        self.force().try_advance(sink)
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        self.force().try_split()
    }

    fn estimate_size(&self) -> Option<u64> {
        match &self.inner {
            Some(inner) => inner.estimate_size(),
            None => self.declared_size,
        }
    }

    fn characteristics(&self) -> Characteristics {
        match &self.inner {
            Some(inner) => inner.characteristics(),
            None => self.declared,
        }
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        match &self.inner {
            Some(inner) => inner.comparator(),
            None => self.cmp.clone(),
        }
    }
}

/// Plain iterator over a boxed source; the inverse of [`IterSource`].
pub struct SourceIter<T> {
    source: Box<dyn SplitSource<T>>,
}

impl<T> SourceIter<T> {
    pub fn new(source: Box<dyn SplitSource<T>>) -> SourceIter<T> {
        SourceIter { source }
    }
}

impl<T> Iterator for SourceIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let mut slot = None;
        if self.source.try_advance(&mut |item| slot = Some(item)) {
            slot
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.source.estimate_size() {
            Some(n) => (n as usize, Some(n as usize)),
            None => (0, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(source: &mut dyn SplitSource<T>) -> Vec<T> {
        let mut out = Vec::new();
        source.for_each_remaining(&mut |item| out.push(item));
        out
    }

    #[test]
    fn vec_source_split_is_prefix() {
        let mut source = VecSource::new(vec![1, 2, 3, 4, 5]);
        let mut prefix = source.try_split().expect("splittable");
        assert_eq!(drain(prefix.as_mut()), vec![1, 2]);
        assert_eq!(drain(&mut source), vec![3, 4, 5]);
    }

    #[test]
    fn range_source_midpoint_split() {
        let mut source = RangeSource::new(0..10);
        let mut prefix = source.try_split().expect("splittable");
        assert_eq!(drain(prefix.as_mut()), vec![0, 1, 2, 3, 4]);
        assert_eq!(source.estimate_size(), Some(5));
        assert_eq!(drain(&mut source), vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn iter_source_batches_prefix() {
        let mut source = IterSource::new(0..5000);
        let mut prefix = source.try_split().expect("splittable");
        let head = drain(prefix.as_mut());
        assert_eq!(head.len(), 1024);
        assert_eq!(head[0], 0);
        let tail = drain(&mut source);
        assert_eq!(tail[0], 1024);
        assert_eq!(head.len() + tail.len(), 5000);
    }

    #[test]
    fn deferred_source_is_lazy() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let built = Arc::new(AtomicBool::new(false));
        let flag = built.clone();
        let mut source = DeferredSource::new(
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                Box::new(VecSource::new(vec![7, 8])) as Box<dyn SplitSource<i32>>
            }),
            Characteristics::ORDERED,
            Some(2),
            None,
        );
        assert!(!built.load(Ordering::SeqCst));
        assert_eq!(source.estimate_size(), Some(2));
        assert_eq!(drain(&mut source), vec![7, 8]);
        assert!(built.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_source_reports_zero() {
        let mut source = EmptySource::<u8>::new();
        assert_eq!(source.estimate_size(), Some(0));
        assert!(drain(&mut source).is_empty());
        assert!(source.try_split().is_none());
    }
}
