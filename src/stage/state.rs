//! Per-stage lifecycle state: started / linked / closed flags, close-hook
//! registration, and the idempotent, exception-aggregating close cascade

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BoxError, PipelineError, PipelineResult};

/// A hook to run when the stage closes.
pub(crate) type CloseHook = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Lifecycle flags for one stage, linked to the states of its upstream
/// stages so that start and close cascade through the whole chain.
///
/// Transitions: UNUSED -> LINKED when a successor is derived, and
/// independently UNUSED/LINKED -> STARTED -> CLOSED. Each transition happens
/// at most once; close is idempotent under concurrent callers.
pub(crate) struct StageState {
    started: AtomicBool,
    linked: AtomicBool,
    closed: AtomicBool,
    upstream: Vec<Arc<StageState>>,
    hooks: Mutex<Vec<CloseHook>>,
}

impl StageState {
    pub(crate) fn new(upstream: Vec<Arc<StageState>>) -> Arc<StageState> {
        Arc::new(StageState {
            started: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            upstream,
            hooks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_consumed(&self) -> bool {
        self.is_linked() || self.is_started() || self.is_closed()
    }

    /// Mark this stage as having a derived successor. Fails if the stage has
    /// already been linked, started, or closed.
    pub(crate) fn mark_linked(&self) -> PipelineResult<()> {
        if self.is_consumed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        self.linked.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Guarded start for the terminal stage of a chain: fails if this stage
    /// was already consumed, then cascades an unguarded start upstream
    /// (upstream stages are linked by construction).
    pub(crate) fn begin(&self) -> PipelineResult<()> {
        if self.is_linked() || self.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyConsumed);
        }
        for upstream in &self.upstream {
            upstream.force_start();
        }
        Ok(())
    }

    /// Unguarded, idempotent start used for cascades and shared fork
    /// upstreams.
    pub(crate) fn force_start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            for upstream in &self.upstream {
                upstream.force_start();
            }
        }
    }

    /// Register a close hook. Fails once the stage is closed.
    pub(crate) fn add_hook(&self, hook: CloseHook) -> PipelineResult<()> {
        if self.is_closed() {
            return Err(PipelineError::AlreadyConsumed);
        }
        self.hooks
            .lock()
            .expect("close hook lock poisoned")
            .push(hook);
        Ok(())
    }

    /// Close this stage and cascade upstream. Only the first caller runs
    /// hooks; concurrent and repeat callers no-op. Every hook runs even when
    /// earlier hooks fail or panic; the first failure becomes the primary
    /// error and the rest are attached as suppressed.
    pub(crate) fn close(&self) -> PipelineResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let hooks = mem::take(&mut *self.hooks.lock().expect("close hook lock poisoned"));
        let mut failures = Vec::new();
        for hook in hooks {
            match catch_unwind(AssertUnwindSafe(hook)) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    log::warn!("close hook failed: {}", error);
                    failures.push(PipelineError::CloseHook {
                        message: error.to_string(),
                    });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::warn!("close hook panicked: {}", message);
                    failures.push(PipelineError::CloseHook { message });
                }
            }
        }
        for upstream in &self.upstream {
            if let Err(error) = upstream.close() {
                failures.push(error);
            }
        }
        PipelineError::aggregate(failures)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "close hook panicked".to_string()
    }
}

/// Closes a stage chain when dropped, so teardown runs even while a user
/// closure's panic unwinds through the engine. `finish` consumes the guard
/// for the normal path, where the caller wants the close outcome.
pub(crate) struct CloseGuard {
    state: Option<Arc<StageState>>,
}

impl CloseGuard {
    pub(crate) fn new(state: Arc<StageState>) -> CloseGuard {
        CloseGuard { state: Some(state) }
    }

    pub(crate) fn finish(mut self) -> PipelineResult<()> {
        match self.state.take() {
            Some(state) => state.close(),
            None => Ok(()),
        }
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if let Err(error) = state.close() {
                log::warn!("pipeline close during unwind failed: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn begin_twice_fails() {
        let state = StageState::new(Vec::new());
        assert!(state.begin().is_ok());
        assert!(matches!(state.begin(), Err(PipelineError::AlreadyConsumed)));
    }

    #[test]
    fn linked_stage_cannot_begin_or_relink() {
        let state = StageState::new(Vec::new());
        assert!(state.mark_linked().is_ok());
        assert!(matches!(
            state.mark_linked(),
            Err(PipelineError::AlreadyConsumed)
        ));
        assert!(matches!(state.begin(), Err(PipelineError::AlreadyConsumed)));
    }

    #[test]
    fn begin_cascades_to_linked_upstream() {
        let upstream = StageState::new(Vec::new());
        upstream.mark_linked().expect("link");
        let state = StageState::new(vec![upstream.clone()]);
        state.begin().expect("start");
        assert!(upstream.is_started());
    }

    #[test]
    fn close_runs_each_hook_once() {
        let state = StageState::new(Vec::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        state
            .add_hook(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .expect("register");
        state.close().expect("first close");
        state.close().expect("second close");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_aggregates_hook_failures() {
        let state = StageState::new(Vec::new());
        state
            .add_hook(Box::new(|| Err("first failure".into())))
            .expect("register");
        state
            .add_hook(Box::new(|| panic!("second failure")))
            .expect("register");
        match state.close() {
            Err(PipelineError::Close {
                primary,
                suppressed,
            }) => {
                assert!(primary.to_string().contains("first failure"));
                assert_eq!(suppressed.len(), 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn concurrent_close_is_idempotent() {
        let state = StageState::new(Vec::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        state
            .add_hook(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .expect("register");
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let state = &state;
                scope.spawn(move || state.close());
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
