//! Head stages: the chain elements that wrap a genuine data source, either
//! eagerly or behind a deferred supplier

use std::sync::{Arc, Mutex};

use super::core::{HeadState, Stage};
use super::state::StageState;
use crate::error::{PipelineError, PipelineResult};
use crate::source::{Characteristics, Comparator, DeferredSource, SplitSource};

type Supplier<T> = Box<dyn FnOnce() -> Box<dyn SplitSource<T>> + Send>;

enum HeadSlot<T> {
    Eager(Box<dyn SplitSource<T>>),
    Deferred {
        supplier: Supplier<T>,
        chars: Characteristics,
        size: Option<u64>,
        cmp: Option<Arc<Comparator<T>>>,
    },
    Taken,
}

/// The head of a chain. The source slot is emptied the first time the chain
/// builds its output view; a second take reports the chain consumed.
pub(crate) struct HeadStage<T> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    slot: Mutex<HeadSlot<T>>,
}

impl<T: Send + 'static> HeadStage<T> {
    pub(crate) fn eager(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        source: Box<dyn SplitSource<T>>,
    ) -> HeadStage<T> {
        HeadStage {
            state,
            head,
            slot: Mutex::new(HeadSlot::Eager(source)),
        }
    }

    pub(crate) fn deferred(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        supplier: Supplier<T>,
        chars: Characteristics,
        size: Option<u64>,
        cmp: Option<Arc<Comparator<T>>>,
    ) -> HeadStage<T> {
        HeadStage {
            state,
            head,
            slot: Mutex::new(HeadSlot::Deferred {
                supplier,
                chars,
                size,
                cmp,
            }),
        }
    }
}

impl<T: Send + 'static> Stage<T> for HeadStage<T> {
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
        let mut slot = self.slot.lock().expect("head source lock poisoned");
        match std::mem::replace(&mut *slot, HeadSlot::Taken) {
            HeadSlot::Eager(source) => Ok(source),
            HeadSlot::Deferred {
                supplier,
                chars,
                size,
                cmp,
            } => Ok(Box::new(DeferredSource::new(supplier, chars, size, cmp))),
            HeadSlot::Taken => Err(PipelineError::AlreadyConsumed),
        }
    }

    fn characteristics(&self) -> Characteristics {
        match &*self.slot.lock().expect("head source lock poisoned") {
            HeadSlot::Eager(source) => source.characteristics(),
            HeadSlot::Deferred { chars, .. } => *chars,
            HeadSlot::Taken => Characteristics::empty(),
        }
    }

    fn estimate_size(&self) -> Option<u64> {
        match &*self.slot.lock().expect("head source lock poisoned") {
            HeadSlot::Eager(source) => source.estimate_size(),
            HeadSlot::Deferred { size, .. } => *size,
            HeadSlot::Taken => None,
        }
    }

    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        match &*self.slot.lock().expect("head source lock poisoned") {
            HeadSlot::Eager(source) => source.comparator(),
            HeadSlot::Deferred { cmp, .. } => cmp.clone(),
            HeadSlot::Taken => None,
        }
    }
}
