//! Error types and handling for flowline
//!
//! This module provides the error taxonomy for pipeline construction,
//! execution, and teardown.

use thiserror::Error;

/// Boxed error type accepted from close hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline stage was reused after a successor was derived from it,
    /// after it was started by a terminal operation, or after it was closed.
    #[error("pipeline has already been consumed, started, or closed")]
    AlreadyConsumed,

    /// A bridge operator started the pipeline it was handed instead of
    /// returning a lazy representation.
    #[error("bridge operator started the pipeline it was given")]
    OperatorStartedPipeline,

    /// A single close hook failed or panicked.
    #[error("close hook failed: {message}")]
    CloseHook { message: String },

    /// One or more close hooks failed during teardown. The first failure is
    /// the primary; the rest are retained as suppressed secondaries.
    #[error("close failed: {primary}; {} suppressed failure(s)", .suppressed.len())]
    Close {
        primary: Box<PipelineError>,
        suppressed: Vec<PipelineError>,
    },
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Fold a list of teardown failures into a single error, first failure
    /// primary and the rest suppressed.
    pub(crate) fn aggregate(failures: Vec<PipelineError>) -> PipelineResult<()> {
        let mut iter = failures.into_iter();
        match iter.next() {
            None => Ok(()),
            Some(primary) => Err(PipelineError::Close {
                primary: Box::new(primary),
                suppressed: iter.collect(),
            }),
        }
    }
}
