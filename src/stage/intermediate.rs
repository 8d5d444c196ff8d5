//! Intermediate stages: stateless-shape per-element transforms expressed as
//! a node factory plus characteristic and size adjusters

use std::sync::Arc;

use super::core::{HeadState, Stage};
use super::state::StageState;
use crate::error::{PipelineError, PipelineResult};
use crate::node::NodeFactory;
use crate::source::adapt::{CharsAdjust, NodeSource, SizeAdjust};
use crate::source::{Characteristics, SplitSource};

/// An intermediate stage: wraps its predecessor, adapts the predecessor's
/// output view through a per-branch node, and composes the predecessor's
/// characteristics and size estimate through two pure adjusters.
pub(crate) struct NodeStage<In: Send + 'static, Out: Send + 'static> {
    state: Arc<StageState>,
    head: Arc<HeadState>,
    prev: Arc<dyn Stage<In>>,
    factory: NodeFactory<In, Out>,
    chars_adjust: CharsAdjust,
    size_adjust: SizeAdjust,
}

impl<In: Send + 'static, Out: Send + 'static> NodeStage<In, Out> {
    pub(crate) fn new(
        state: Arc<StageState>,
        head: Arc<HeadState>,
        prev: Arc<dyn Stage<In>>,
        factory: NodeFactory<In, Out>,
        chars_adjust: CharsAdjust,
        size_adjust: SizeAdjust,
    ) -> NodeStage<In, Out> {
        NodeStage {
            state,
            head,
            prev,
            factory,
            chars_adjust,
            size_adjust,
        }
    }
}

impl<In: Send + 'static, Out: Send + 'static> Stage<Out> for NodeStage<In, Out> {
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
        let inner = self.prev.output_source()?;
        Ok(Box::new(NodeSource::new(
            inner,
            self.factory.clone(),
            self.head.is_parallel(),
            self.chars_adjust.clone(),
            self.size_adjust.clone(),
        )))
    }

    fn characteristics(&self) -> Characteristics {
        (*self.chars_adjust)(self.prev.characteristics())
    }

    fn estimate_size(&self) -> Option<u64> {
        (*self.size_adjust)(self.prev.estimate_size())
    }
}
