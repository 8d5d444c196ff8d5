//! Core splittable-source trait and structural characteristics

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;

/// Comparison function shared across split branches of a sorted source.
pub type Comparator<T> = dyn Fn(&T, &T) -> Ordering + Send + Sync;

/// Structural characteristics of a source, propagated through the stage
/// chain and consulted by the execution engine.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Characteristics(u32);

impl Characteristics {
    /// Elements have a defined encounter order that splits must preserve.
    pub const ORDERED: Characteristics = Characteristics(1 << 0);
    /// `estimate_size` is an exact remaining count.
    pub const SIZED: Characteristics = Characteristics(1 << 1);
    /// Every split of this source is itself SIZED.
    pub const SUBSIZED: Characteristics = Characteristics(1 << 2);
    /// Elements appear in sorted order (by comparator, or natural order when
    /// no comparator is reported).
    pub const SORTED: Characteristics = Characteristics(1 << 3);
    /// No two elements are equal.
    pub const DISTINCT: Characteristics = Characteristics(1 << 4);
    /// The source never produces an absent value.
    pub const NONNULL: Characteristics = Characteristics(1 << 5);
    /// The underlying data cannot change while the source is consumed.
    pub const IMMUTABLE: Characteristics = Characteristics(1 << 6);
    /// The underlying data may be mutated concurrently without invalidating
    /// the source.
    pub const CONCURRENT: Characteristics = Characteristics(1 << 7);

    /// The empty flag set.
    pub fn empty() -> Characteristics {
        Characteristics(0)
    }

    /// True if every flag in `other` is set in `self`.
    pub fn contains(self, other: Characteristics) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union with `other`.
    pub fn with(self, other: Characteristics) -> Characteristics {
        Characteristics(self.0 | other.0)
    }

    /// Difference: `self` with every flag in `other` cleared.
    pub fn without(self, other: Characteristics) -> Characteristics {
        Characteristics(self.0 & !other.0)
    }
}

impl BitOr for Characteristics {
    type Output = Characteristics;

    fn bitor(self, rhs: Characteristics) -> Characteristics {
        Characteristics(self.0 | rhs.0)
    }
}

impl BitOrAssign for Characteristics {
    fn bitor_assign(&mut self, rhs: Characteristics) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Characteristics {
    type Output = Characteristics;

    fn bitand(self, rhs: Characteristics) -> Characteristics {
        Characteristics(self.0 & rhs.0)
    }
}

impl fmt::Debug for Characteristics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Characteristics, &str); 8] = [
            (Characteristics::ORDERED, "ORDERED"),
            (Characteristics::SIZED, "SIZED"),
            (Characteristics::SUBSIZED, "SUBSIZED"),
            (Characteristics::SORTED, "SORTED"),
            (Characteristics::DISTINCT, "DISTINCT"),
            (Characteristics::NONNULL, "NONNULL"),
            (Characteristics::IMMUTABLE, "IMMUTABLE"),
            (Characteristics::CONCURRENT, "CONCURRENT"),
        ];
        let mut listed = false;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if listed {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                listed = true;
            }
        }
        if !listed {
            write!(f, "(none)")?;
        }
        Ok(())
    }
}

/// A splittable data source: produces elements one at a time and can attempt
/// to divide itself into two disjoint sources for parallel decomposition.
///
/// A single instance must only be used from one thread at a time; parallel
/// execution first splits, then hands each resulting disjoint source to a
/// separate thread.
pub trait SplitSource<T>: Send {
    /// Deliver the next element to `sink` and return true, or return false
    /// when exhausted. `sink` is invoked at most once per call.
    fn try_advance(&mut self, sink: &mut dyn FnMut(T)) -> bool;

    /// Carve off a disjoint prefix of the undelivered elements as a new
    /// independent source, or return `None` when this source considers
    /// itself too small or fundamentally unsplittable.
    ///
    /// For ORDERED sources the returned prefix precedes the remaining
    /// suffix in encounter order.
    fn try_split(&mut self) -> Option<Box<dyn SplitSource<T>>>;

    /// Estimated number of remaining elements; `None` when unknown.
    fn estimate_size(&self) -> Option<u64>;

    /// Structural characteristics of the remaining elements.
    fn characteristics(&self) -> Characteristics;

    /// The comparator governing SORTED order, if this source is sorted by
    /// an explicit comparator. Natural-order sorted sources return `None`.
    fn comparator(&self) -> Option<Arc<Comparator<T>>> {
        None
    }

    /// Drain every remaining element into `sink`.
    fn for_each_remaining(&mut self, sink: &mut dyn FnMut(T)) {
        while self.try_advance(sink) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_algebra() {
        let c = Characteristics::ORDERED | Characteristics::SIZED;
        assert!(c.contains(Characteristics::ORDERED));
        assert!(!c.contains(Characteristics::SORTED));
        assert!(c.without(Characteristics::SIZED) == Characteristics::ORDERED);
        assert!((c & Characteristics::SIZED) == Characteristics::SIZED);
    }

    #[test]
    fn debug_lists_flags() {
        let c = Characteristics::ORDERED | Characteristics::DISTINCT;
        let text = format!("{:?}", c);
        assert!(text.contains("ORDERED"));
        assert!(text.contains("DISTINCT"));
        assert_eq!(format!("{:?}", Characteristics::empty()), "(none)");
    }
}
