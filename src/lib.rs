//! flowline - a lazy, closeable, parallel-capable data pipeline library
//!
//! A pipeline is a chain of transformation stages over a splittable data
//! source, executed either sequentially on the calling thread or by
//! recursive fork/join decomposition, with start-once/close-once lifecycle
//! guarantees and encounter-order preservation wherever the ORDERED
//! characteristic survives to the terminal operation.

pub mod engine;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod reduce;
pub mod source;
pub mod stage;

// Re-export the primary surface at the crate root
pub use engine::ExecConfig;
pub use error::{BoxError, PipelineError, PipelineResult};
pub use node::StageNode;
pub use pipeline::{Pipeline, PipelineIter};
pub use reduce::Reduction;
pub use source::{Characteristics, Comparator, SplitSource};
pub use stage::{BridgeInput, Bridged};
