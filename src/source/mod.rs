//! Splittable data sources
//!
//! A source produces elements one at a time, reports structural
//! characteristics and a size estimate, and can attempt to divide itself
//! into two disjoint sources for recursive parallel decomposition.

pub mod adapt;
pub mod constructors;
pub mod core;
pub(crate) mod fork;

pub use self::adapt::{ChainSource, MergeSource, NodeSource};
pub use self::constructors::{
    DeferredSource, EmptySource, IterSource, RangeSource, SourceIter, VecSource,
};
pub use self::core::{Characteristics, Comparator, SplitSource};
