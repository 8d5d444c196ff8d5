//! The pipeline stage chain
//!
//! Stages form a linked structure: each wraps its predecessor, adapts the
//! head source into its own output view, and derives characteristics and
//! size estimates from the predecessor's. Lifecycle flags live beside the
//! chain and cascade start/close through it.

pub(crate) mod core;
pub(crate) mod head;
pub(crate) mod intermediate;
pub mod reshape;
pub(crate) mod state;

pub(crate) use self::core::{HeadState, Stage};
pub(crate) use self::head::HeadStage;
pub(crate) use self::intermediate::NodeStage;
pub(crate) use self::state::{CloseGuard, StageState};

pub use self::reshape::{BridgeInput, Bridged};
