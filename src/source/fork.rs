//! Thread-safe fork hub: tees one shared upstream source into N
//! independently consumable forks

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::core::{Characteristics, SplitSource};
use crate::error::PipelineResult;

type HubSupplier<T> = Box<dyn FnOnce() -> Box<dyn SplitSource<T>> + Send>;
type HubTeardown = Box<dyn FnOnce() -> PipelineResult<()> + Send>;

struct HubShared<T> {
    supplier: Option<HubSupplier<T>>,
    source: Option<Box<dyn SplitSource<T>>>,
    exhausted: bool,
}

/// Shared state behind `fork(n)`: one upstream source advanced under a
/// mutex, one element buffer per fork, and a teardown latch that closes the
/// shared upstream exactly once, when the last fork closes.
///
/// The upstream chain is started by whichever fork pulls first; later forks
/// find the source already materialized.
pub(crate) struct ForkHub<T> {
    shared: Mutex<HubShared<T>>,
    buffers: Vec<Mutex<VecDeque<T>>>,
    open_forks: AtomicUsize,
    teardown: Mutex<Option<HubTeardown>>,
}

impl<T: Clone + Send + 'static> ForkHub<T> {
    pub(crate) fn new(
        forks: usize,
        supplier: HubSupplier<T>,
        teardown: HubTeardown,
    ) -> Arc<ForkHub<T>> {
        Arc::new(ForkHub {
            shared: Mutex::new(HubShared {
                supplier: Some(supplier),
                source: None,
                exhausted: false,
            }),
            buffers: (0..forks).map(|_| Mutex::new(VecDeque::new())).collect(),
            open_forks: AtomicUsize::new(forks),
            teardown: Mutex::new(Some(teardown)),
        })
    }

    /// Advance the shared upstream by one element, distributing a clone to
    /// every fork's buffer. Returns false once the upstream is exhausted;
    /// after that no buffer ever grows again.
    fn pull(&self) -> bool {
        let mut shared = self.shared.lock().expect("fork hub lock poisoned");
        if shared.exhausted {
            return false;
        }
        if shared.source.is_none() {
            if let Some(supplier) = shared.supplier.take() {
                shared.source = Some(supplier());
            }
        }
        let source = match shared.source.as_mut() {
            Some(source) => source,
            None => return false,
        };
        let mut delivered = None;
        if !source.try_advance(&mut |item| delivered = Some(item)) {
            shared.exhausted = true;
            return false;
        }
        if let Some(item) = delivered {
            let (last, rest) = match self.buffers.split_last() {
                Some(split) => split,
                None => return true,
            };
            for buffer in rest {
                buffer
                    .lock()
                    .expect("fork buffer lock poisoned")
                    .push_back(item.clone());
            }
            last.lock()
                .expect("fork buffer lock poisoned")
                .push_back(item);
        }
        true
    }

    /// Called from each fork's close hook. The last release runs the
    /// teardown latch, closing the shared upstream exactly once.
    pub(crate) fn release(&self) -> PipelineResult<()> {
        if self.open_forks.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Some(teardown) = self
                .teardown
                .lock()
                .expect("fork teardown lock poisoned")
                .take()
            {
                log::debug!("fork hub: last fork closed, tearing down shared upstream");
                return teardown();
            }
        }
        Ok(())
    }
}

/// One fork's view over a [`ForkHub`]: pops its own buffer, pulling the
/// shared upstream when the buffer runs dry. Unsplittable.
pub(crate) struct ForkSource<T> {
    hub: Arc<ForkHub<T>>,
    index: usize,
    chars: Characteristics,
}

impl<T> ForkSource<T> {
    pub(crate) fn new(hub: Arc<ForkHub<T>>, index: usize, chars: Characteristics) -> ForkSource<T> {
        ForkSource { hub, index, chars }
    }

    fn pop_buffered(&self) -> Option<T> {
        self.hub.buffers[self.index]
            .lock()
            .expect("fork buffer lock poisoned")
            .pop_front()
    }
}

impl<T: Clone + Send + 'static> SplitSource<T> for ForkSource<T> {
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool {
        loop {
            if let Some(item) = self.pop_buffered() {
                sink(item);
                return true;
            }
            if !self.hub.pull() {
                // A racing fork may have buffered for us between the pop and
                // the failed pull; exhaustion stops all pushes, so one
                // recheck is enough.
                return match self.pop_buffered() {
                    Some(item) => {
                        sink(item);
                        true
                    }
                    None => false,
                };
            }
        }
    }

    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>> {
        None
    }

    fn estimate_size(&self) -> Option<u64> {
        let buffered = self.hub.buffers[self.index]
            .lock()
            .expect("fork buffer lock poisoned")
            .len() as u64;
        let shared = self.hub.shared.lock().expect("fork hub lock poisoned");
        if shared.exhausted {
            return Some(buffered);
        }
        match &shared.source {
            Some(source) => source
                .estimate_size()
                .map(|remaining| remaining.saturating_add(buffered)),
            None => None,
        }
    }

    fn characteristics(&self) -> Characteristics {
        self.chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::constructors::VecSource;

    fn hub_over(items: Vec<i32>, forks: usize) -> Arc<ForkHub<i32>> {
        ForkHub::new(
            forks,
            Box::new(move || Box::new(VecSource::new(items)) as Box<dyn SplitSource<i32>>),
            Box::new(|| Ok(())),
        )
    }

    #[test]
    fn every_fork_sees_every_element() {
        let hub = hub_over(vec![1, 2, 3], 2);
        let mut a = ForkSource::new(hub.clone(), 0, Characteristics::ORDERED);
        let mut b = ForkSource::new(hub, 1, Characteristics::ORDERED);
        let mut seen_a = Vec::new();
        a.for_each_remaining(&mut |item| seen_a.push(item));
        let mut seen_b = Vec::new();
        b.for_each_remaining(&mut |item| seen_b.push(item));
        assert_eq!(seen_a, vec![1, 2, 3]);
        assert_eq!(seen_b, vec![1, 2, 3]);
    }

    #[test]
    fn teardown_runs_once_after_last_release() {
        use std::sync::atomic::AtomicUsize;
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let hub = ForkHub::new(
            2,
            Box::new(|| Box::new(VecSource::new(vec![1])) as Box<dyn SplitSource<i32>>),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        hub.release().expect("first release");
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        hub.release().expect("second release");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
