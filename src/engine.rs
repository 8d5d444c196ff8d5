//! The reduction engine
//!
//! Executes a started stage chain against a reduction description, either on
//! the calling thread or by recursive divide-and-conquer over scoped worker
//! threads: split the source, fork the suffix, continue with the prefix,
//! join, combine. Close always runs, on success, failure, and unwinding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::error::PipelineResult;
use crate::reduce::Reduction;
use crate::source::SplitSource;
use crate::stage::{CloseGuard, Stage};

/// Default element-count threshold below which a segment is folded directly
/// instead of split further.
pub const DEFAULT_SPLIT_THRESHOLD: u64 = 100;

lazy_static! {
    /// Process-wide default parallelism, computed once.
    static ref DEFAULT_PARALLELISM: usize = num_cpus::get().max(1);
}

/// Tuning for parallel execution. These are performance constants, not
/// semantic contracts; any setting yields the same results.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Number of workers. `None` uses the process-wide default parallelism.
    pub num_workers: Option<usize>,
    /// Segments at or below this estimated size are folded directly.
    pub split_threshold: u64,
    /// Maximum split recursion depth. `None` derives it from the worker
    /// count: the bit length of the next power of two of twice the workers.
    pub max_split_depth: Option<u32>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            num_workers: None,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_split_depth: None,
        }
    }
}

impl ExecConfig {
    pub(crate) fn workers(&self) -> usize {
        self.num_workers.unwrap_or(*DEFAULT_PARALLELISM).max(1)
    }

    pub(crate) fn depth(&self) -> u32 {
        match self.max_split_depth {
            Some(depth) => depth,
            None => {
                let target = (2 * self.workers() as u64).next_power_of_two();
                u64::BITS - target.leading_zeros()
            }
        }
    }
}

/// Shared cooperative cancel flag, checked before every element pull and
/// before every recursive split.
struct ExecContext {
    cancel: AtomicBool,
}

impl ExecContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Run the full reduction against a not-yet-started chain: start, fold
/// (sequentially or via fork/join), close, finish.
pub(crate) fn execute<T, A, R>(
    stage: &Arc<dyn Stage<T>>,
    reduction: &Reduction<T, A, R>,
) -> PipelineResult<R>
where
    T: Send + 'static,
    A: Send,
{
    stage.state().begin()?;
    let guard = CloseGuard::new(stage.state().clone());
    let outcome: PipelineResult<R> = (|| {
        let source = stage.output_source()?;
        let head = stage.head();
        let exec = head.exec();
        let acc = if head.is_parallel() && exec.workers() > 1 {
            parallel_fold(source, reduction, &exec)
        } else {
            sequential_fold(source, reduction)
        };
        Ok((*reduction.finish)(acc))
    })();
    let closed = guard.finish();
    match (outcome, closed) {
        (Ok(result), Ok(())) => Ok(result),
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(close_error)) => {
            log::warn!(
                "pipeline close failed after execution error, suppressing: {}",
                close_error
            );
            Err(error)
        }
    }
}

fn sequential_fold<T, A, R>(
    mut source: Box<dyn SplitSource<T>>,
    reduction: &Reduction<T, A, R>,
) -> A {
    let mut acc = (*reduction.supply)();
    match &reduction.short_circuit {
        None => {
            let accumulate = &*reduction.accumulate;
            source.for_each_remaining(&mut |item| accumulate(&mut acc, item));
        }
        Some(probe) => {
            while !(**probe)(&acc)
                && source.try_advance(&mut |item| (*reduction.accumulate)(&mut acc, item))
            {}
        }
    }
    acc
}

fn parallel_fold<T, A, R>(
    source: Box<dyn SplitSource<T>>,
    reduction: &Reduction<T, A, R>,
    exec: &ExecConfig,
) -> A
where
    T: Send + 'static,
    A: Send,
{
    let ctx = ExecContext {
        cancel: AtomicBool::new(false),
    };
    let depth = exec.depth();
    log::debug!(
        "parallel reduction: workers={} threshold={} depth={}",
        exec.workers(),
        exec.split_threshold,
        depth
    );
    match &reduction.share {
        // Concurrent accumulator: one shared handle, no merging.
        Some(share) => {
            let root = (*reduction.supply)();
            let seed = (**share)(&root);
            split_fold(source, reduction, &ctx, exec.split_threshold, depth, Some(seed));
            root
        }
        None => split_fold(source, reduction, &ctx, exec.split_threshold, depth, None),
    }
}

/// One divide-and-conquer task: either folds its segment directly or splits,
/// forks the suffix to a scoped thread, continues with the prefix, joins,
/// and combines. A panic in any branch is re-raised through the join.
fn split_fold<T, A, R>(
    mut source: Box<dyn SplitSource<T>>,
    reduction: &Reduction<T, A, R>,
    ctx: &ExecContext,
    threshold: u64,
    depth: u32,
    shared: Option<A>,
) -> A
where
    T: Send + 'static,
    A: Send,
{
    if ctx.cancelled() {
        return shared.unwrap_or_else(|| (*reduction.supply)());
    }
    let splittable = depth > 0
        && source
            .estimate_size()
            .map_or(true, |size| size > threshold);
    if splittable {
        if let Some(prefix) = source.try_split() {
            let suffix = source;
            let right_seed = match (&shared, &reduction.share) {
                (Some(handle), Some(share)) => Some((**share)(handle)),
                _ => None,
            };
            return std::thread::scope(|scope| {
                let suffix_task = scope.spawn(move || {
                    split_fold(suffix, reduction, ctx, threshold, depth - 1, right_seed)
                });
                let left = split_fold(prefix, reduction, ctx, threshold, depth - 1, shared);
                let right = match suffix_task.join() {
                    Ok(acc) => acc,
                    Err(payload) => std::panic::resume_unwind(payload),
                };
                if reduction.share.is_some() {
                    // Both sides fold into the same logical accumulator.
                    left
                } else {
                    (*reduction.combine)(left, right)
                }
            });
        }
    }
    leaf_fold(source, reduction, ctx, shared)
}

/// Fold a leaf segment on the current thread, honoring the cooperative
/// cancel flag and the reduction's short-circuit probe.
fn leaf_fold<T, A, R>(
    mut source: Box<dyn SplitSource<T>>,
    reduction: &Reduction<T, A, R>,
    ctx: &ExecContext,
    shared: Option<A>,
) -> A {
    let mut acc = shared.unwrap_or_else(|| (*reduction.supply)());
    loop {
        if ctx.cancelled() {
            break;
        }
        if let Some(probe) = &reduction.short_circuit {
            if (**probe)(&acc) {
                if reduction.cancels_globally {
                    ctx.cancel();
                }
                break;
            }
        }
        if !source.try_advance(&mut |item| (*reduction.accumulate)(&mut acc, item)) {
            break;
        }
    }
    acc
}
