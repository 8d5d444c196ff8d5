//! Per-branch stage nodes
//!
//! A node carries the per-element logic of one intermediate stage. Nodes are
//! built from a factory once per execution branch, so stateful nodes never
//! share mutable state across threads unless that state is an explicitly
//! thread-safe cell captured by the factory.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// One stage's per-element transformer. `apply` may emit zero, one, or many
/// outputs per input; `finish` runs once when the upstream is exhausted, for
/// nodes that buffer.
pub trait StageNode<In, Out>: Send {
    fn apply(&mut self, item: In, out: &mut dyn FnMut(Out));

    fn finish(&mut self, _out: &mut dyn FnMut(Out)) {}
}

/// Factory producing a fresh node per execution branch. The flag is the
/// chain's parallel mode at start time.
pub type NodeFactory<In, Out> = Arc<dyn Fn(bool) -> Box<dyn StageNode<In, Out>> + Send + Sync>;

pub(crate) struct MapNode<F> {
    pub(crate) f: Arc<F>,
}

impl<In, Out, F> StageNode<In, Out> for MapNode<F>
where
    F: Fn(In) -> Out + Send + Sync,
{
    fn apply(&mut self, item: In, out: &mut dyn FnMut(Out)) {
        out((*self.f)(item));
    }
}

pub(crate) struct FilterNode<F> {
    pub(crate) predicate: Arc<F>,
}

impl<T, F> StageNode<T, T> for FilterNode<F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn apply(&mut self, item: T, out: &mut dyn FnMut(T)) {
        if (*self.predicate)(&item) {
            out(item);
        }
    }
}

pub(crate) struct FlatMapNode<F> {
    pub(crate) f: Arc<F>,
}

impl<In, Out, It, F> StageNode<In, Out> for FlatMapNode<F>
where
    F: Fn(In) -> It + Send + Sync,
    It: IntoIterator<Item = Out>,
{
    fn apply(&mut self, item: In, out: &mut dyn FnMut(Out)) {
        for produced in (*self.f)(item) {
            out(produced);
        }
    }
}

pub(crate) struct PeekNode<F> {
    pub(crate) observer: Arc<F>,
}

impl<T, F> StageNode<T, T> for PeekNode<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn apply(&mut self, item: T, out: &mut dyn FnMut(T)) {
        (*self.observer)(&item);
        out(item);
    }
}

/// Pass-through node for stages that only adjust characteristics.
pub(crate) struct IdentityNode;

impl<T> StageNode<T, T> for IdentityNode {
    fn apply(&mut self, item: T, out: &mut dyn FnMut(T)) {
        out(item);
    }
}

/// Seen-set backing a distinct node: a plain set per branch under sequential
/// execution, one shared thread-safe set across branches under parallel
/// execution.
pub(crate) enum SeenSet<T> {
    Local(HashSet<T>),
    Shared(Arc<Mutex<HashSet<T>>>),
}

pub(crate) struct DistinctNode<T> {
    seen: SeenSet<T>,
}

impl<T> DistinctNode<T> {
    pub(crate) fn local() -> DistinctNode<T> {
        DistinctNode {
            seen: SeenSet::Local(HashSet::new()),
        }
    }

    pub(crate) fn shared(seen: Arc<Mutex<HashSet<T>>>) -> DistinctNode<T> {
        DistinctNode {
            seen: SeenSet::Shared(seen),
        }
    }
}

impl<T> StageNode<T, T> for DistinctNode<T>
where
    T: Eq + Hash + Clone + Send,
{
    fn apply(&mut self, item: T, out: &mut dyn FnMut(T)) {
        let fresh = match &mut self.seen {
            SeenSet::Local(seen) => seen.insert(item.clone()),
            SeenSet::Shared(seen) => seen
                .lock()
                .expect("distinct seen-set lock poisoned")
                .insert(item.clone()),
        };
        if fresh {
            out(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_outputs<In, Out>(
        node: &mut dyn StageNode<In, Out>,
        inputs: Vec<In>,
    ) -> Vec<Out> {
        let mut out = Vec::new();
        for item in inputs {
            node.apply(item, &mut |o| out.push(o));
        }
        node.finish(&mut |o| out.push(o));
        out
    }

    #[test]
    fn map_node_transforms() {
        let mut node = MapNode {
            f: Arc::new(|x: i32| x * 2),
        };
        assert_eq!(collect_outputs(&mut node, vec![1, 2, 3]), vec![2, 4, 6]);
    }

    #[test]
    fn filter_node_drops() {
        let mut node = FilterNode {
            predicate: Arc::new(|x: &i32| x % 2 == 0),
        };
        assert_eq!(collect_outputs(&mut node, vec![1, 2, 3, 4]), vec![2, 4]);
    }

    #[test]
    fn flat_map_node_expands() {
        let mut node = FlatMapNode {
            f: Arc::new(|x: i32| vec![x, x + 10]),
        };
        assert_eq!(collect_outputs(&mut node, vec![1, 2]), vec![1, 11, 2, 12]);
    }

    #[test]
    fn distinct_node_local_and_shared_agree() {
        let input = vec![1, 2, 1, 3, 2, 4];
        let mut local = DistinctNode::local();
        let shared_set = Arc::new(Mutex::new(HashSet::new()));
        let mut shared = DistinctNode::shared(shared_set);
        assert_eq!(
            collect_outputs(&mut local, input.clone()),
            vec![1, 2, 3, 4]
        );
        assert_eq!(collect_outputs(&mut shared, input), vec![1, 2, 3, 4]);
    }
}
