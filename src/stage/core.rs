//! The stage capability trait and head-owned execution mode

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::state::StageState;
use crate::engine::ExecConfig;
use crate::error::PipelineResult;
use crate::source::{Characteristics, Comparator, SplitSource};

/// Mode cell owned by the chain's head and shared by reference with every
/// derived stage: the parallel/sequential toggle and the execution config
/// actually live here, so non-head stages delegate upward by construction.
pub(crate) struct HeadState {
    parallel: AtomicBool,
    exec: Mutex<ExecConfig>,
}

impl HeadState {
    pub(crate) fn new(parallel: bool) -> Arc<HeadState> {
        Arc::new(HeadState {
            parallel: AtomicBool::new(parallel),
            exec: Mutex::new(ExecConfig::default()),
        })
    }

    pub(crate) fn is_parallel(&self) -> bool {
        self.parallel.load(Ordering::SeqCst)
    }

    pub(crate) fn set_parallel(&self, parallel: bool) {
        self.parallel.store(parallel, Ordering::SeqCst);
    }

    pub(crate) fn exec(&self) -> ExecConfig {
        self.exec.lock().expect("exec config lock poisoned").clone()
    }

    pub(crate) fn set_exec(&self, config: ExecConfig) {
        *self.exec.lock().expect("exec config lock poisoned") = config;
    }
}

/// One element of the stage chain. Exactly three families implement this:
/// heads (wrapping a real or deferred source), intermediates (per-element
/// node factories), and reshaping stages (materializing transforms).
pub(crate) trait Stage<Out: Send + 'static>: Send + Sync {
    /// This stage's lifecycle state.
    fn state(&self) -> &Arc<StageState>;

    /// The chain's head-owned mode cell.
    fn head(&self) -> &Arc<HeadState>;

    /// Build the pull view emitting this stage's output type, composing the
    /// predecessor's view with this stage's own logic. Requires the stage
    /// not be closed, and consumes the head's source slot.
    fn output_source(&self) -> PipelineResult<Box<dyn SplitSource<Out>>>;

    /// Characteristics derived from the predecessor's, recomputed on every
    /// query; never cached, since the chain's mode can change until the
    /// terminal operation starts it.
    fn characteristics(&self) -> Characteristics;

    /// Size estimate derived from the predecessor's.
    fn estimate_size(&self) -> Option<u64>;

    /// The comparator governing this stage's SORTED order, when explicit.
    fn comparator(&self) -> Option<Arc<Comparator<Out>>> {
        None
    }
}
