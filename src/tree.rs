//! The segment B-tree proper: arena, boundary navigation, queries,
//! insertion, deletion and structural rebalancing.

use crate::{
    algebra::{AddAssignByRef, AddByRef, Aggregate, HasZero, NegByRef},
    bulk::endpoint_deltas,
    interval::Interval,
    node::{Node, NodeId},
};
use std::fmt::{self, Debug, Display, Formatter};
use std::mem::replace;
use tracing::trace;

/// An in-memory segment B-tree over the half-open time domain
/// `[0, u32::MAX)`.
///
/// Every node partitions its enclosing interval into up to `B` runs and
/// carries one partial aggregate per run; the true aggregate at an
/// instant is the combination of the partials along the root-to-leaf
/// path through it. Inserting an interval refines the partitions it
/// straddles, deleting combines with the inverse delta, and both
/// re-compact runs and rebalance nodes on the way back up, so queries
/// stay logarithmic in the number of distinct runs.
///
/// Not safe for concurrent use; wrap in an external lock if shared.
#[derive(Clone)]
pub struct SegmentTree<Agg: Aggregate> {
    /// Arena storage for all nodes.
    nodes: Vec<Node<Agg::Delta>>,
    /// Recycled arena slots.
    free: Vec<NodeId>,
    root: NodeId,
    branching_factor: usize,
    aggregate: Agg,
}

impl<Agg: Aggregate> SegmentTree<Agg> {
    /// Creates an empty tree over the whole time domain.
    ///
    /// `branching_factor` bounds the number of children per node; values
    /// below 3 degenerate the split arithmetic and panic.
    pub fn new(branching_factor: usize, aggregate: Agg) -> Self {
        assert!(
            branching_factor >= 3,
            "branching factor must be at least 3, got {branching_factor}"
        );
        Self {
            nodes: vec![Node::leaf(Agg::Delta::zero())],
            free: Vec::new(),
            root: NodeId(0),
            branching_factor,
            aggregate,
        }
    }

    #[inline]
    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    /// True when no interval contributes anywhere: the root is a
    /// keyless leaf carrying the neutral aggregate.
    pub fn is_empty(&self) -> bool {
        let root = self.node(self.root);
        root.is_leaf() && root.size() == 0 && root.values[0].is_zero()
    }

    /// Number of live nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Number of leaf-level runs the domain is currently partitioned
    /// into. An empty tree has one run covering everything.
    pub fn num_runs(&self) -> usize {
        self.count_runs(self.root)
    }

    fn count_runs(&self, node: NodeId) -> usize {
        let node_ref = self.node(node);
        if node_ref.is_leaf() {
            node_ref.values.len()
        } else {
            node_ref
                .children
                .iter()
                .map(|&child| self.count_runs(child))
                .sum()
        }
    }

    /// The aggregate in effect at `instant`.
    pub fn aggregate_at(&self, instant: u32) -> Agg::Delta {
        let mut acc = Agg::Delta::zero();
        let mut current = self.root;
        loop {
            let node = self.node(current);
            let index = node.find_interval_index(instant);
            acc.add_assign_by_ref(&node.values[index]);
            if node.is_leaf() {
                return acc;
            }
            current = node.children[index];
        }
    }

    /// The aggregate function restricted to `interval`, as `(run, value)`
    /// pairs in increasing time order.
    ///
    /// Runs follow leaf granularity: adjacent runs with equal values that
    /// live in different leaves are not coalesced.
    pub fn aggregate_within(&self, interval: Interval) -> Vec<(Interval, Agg::Delta)> {
        let mut runs = Vec::new();
        self.collect_runs(self.root, interval, &Agg::Delta::zero(), &mut runs);
        runs
    }

    /// Adds one occurrence of `value` over `interval`.
    pub fn insert(&mut self, interval: Interval, value: Agg::Value) {
        let delta = self.aggregate.lift(value);
        self.apply(self.root, interval, &delta);
    }

    /// Removes one previously inserted occurrence of `value` over
    /// `interval` by combining with the inverse delta.
    pub fn delete(&mut self, interval: Interval, value: Agg::Value) {
        let delta = self.aggregate.lift(value).neg_by_ref();
        self.apply(self.root, interval, &delta);
    }

    /// Bulk-loads a batch into an empty tree.
    ///
    /// The batch is reduced to a time-sorted stream of endpoint deltas,
    /// prefix-combined into running aggregates and appended run by run to
    /// the rightmost leaf, splitting up the spine as nodes fill. This
    /// builds the same aggregate function as inserting the tuples one by
    /// one, in one left-to-right pass.
    ///
    /// Panics when the tree is not empty.
    pub fn insert_range(&mut self, batch: Vec<(Interval, Agg::Value)>) {
        assert!(self.is_empty(), "insert_range requires an empty tree");

        let deltas = endpoint_deltas(&self.aggregate, batch);
        trace!("bulk loading {} endpoint deltas", deltas.len());

        let mut running = Agg::Delta::zero();
        let mut leaf = self.root;
        for (time, delta) in deltas {
            if time == u32::MAX {
                // The exclusive domain end opens no run.
                break;
            }
            running.add_assign_by_ref(&delta);

            let leaf_ref = self.node_mut(leaf);
            if time == 0 {
                // A run from the domain origin replaces the initial
                // neutral run instead of opening a zero-width one.
                leaf_ref.values[0] = running.clone();
                continue;
            }
            leaf_ref.keys.push(time);
            leaf_ref.values.push(running.clone());

            // Split up the spine while nodes are at capacity.
            let mut current = leaf;
            while self.node(current).size() >= self.branching_factor {
                let right = self.split(current);
                if current == leaf {
                    leaf = right;
                }
                current = self.node(right).parent.expect("split node has a parent");
            }
        }
    }

    // Arena plumbing.

    #[inline]
    fn node(&self, id: NodeId) -> &Node<Agg::Delta> {
        &self.nodes[id.0]
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> &mut Node<Agg::Delta> {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self, node: Node<Agg::Delta>) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len());
                self.nodes.push(node);
                id
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = Node::leaf(Agg::Delta::zero());
        self.free.push(id);
    }

    // Boundary navigation. A node does not know its own enclosing
    // interval; the bounds of its outermost sub-intervals resolve
    // through the parent, one level per step.

    /// Start of sub-interval `index` of `node`.
    fn interval_start(&self, node: NodeId, index: usize) -> u32 {
        if index > 0 {
            return self.node(node).keys[index - 1];
        }
        match self.node(node).parent {
            None => 0,
            Some(parent) => self.interval_start(parent, self.find_child_index(parent, node)),
        }
    }

    /// End of sub-interval `index` of `node`.
    fn interval_end(&self, node: NodeId, index: usize) -> u32 {
        let node_ref = self.node(node);
        if index < node_ref.size() {
            return node_ref.keys[index];
        }
        match node_ref.parent {
            None => u32::MAX,
            Some(parent) => self.interval_end(parent, self.find_child_index(parent, node)),
        }
    }

    fn node_interval(&self, node: NodeId, index: usize) -> Interval {
        Interval::new(
            self.interval_start(node, index),
            self.interval_end(node, index),
        )
    }

    /// All `size() + 1` sub-intervals of `node`, in order.
    fn node_intervals(&self, node: NodeId) -> Vec<Interval> {
        (0..=self.node(node).size())
            .map(|index| self.node_interval(node, index))
            .collect()
    }

    /// Position of `child` among `parent`'s children.
    fn find_child_index(&self, parent: NodeId, child: NodeId) -> usize {
        self.node(parent)
            .children
            .iter()
            .position(|&candidate| candidate == child)
            .expect("node is not a child of its parent")
    }

    // Queries.

    fn collect_runs(
        &self,
        node: NodeId,
        query: Interval,
        acc: &Agg::Delta,
        runs: &mut Vec<(Interval, Agg::Delta)>,
    ) {
        for (index, sub) in self.node_intervals(node).into_iter().enumerate() {
            let Some(overlap) = query.intersection(&sub) else {
                continue;
            };
            let node_ref = self.node(node);
            let combined = node_ref.values[index].add_by_ref(acc);
            if node_ref.is_leaf() {
                runs.push((overlap, combined));
            } else {
                self.collect_runs(node_ref.children[index], query, &combined, runs);
            }
        }
    }

    // Mutation.

    /// Applies `delta` over `interval` to the subtree rooted at `node`,
    /// then rebalances `node` itself.
    ///
    /// The loop tracks the part of `interval` not yet applied and
    /// re-derives the run index from its start on every step. Handled
    /// spans are clipped off, so a child's rebalance reshaping this
    /// node's partition mid-loop (splitting into it, or fusing with a
    /// sibling that is yet to be visited) cannot lead to double
    /// application: a revisit only ever sees the unapplied remainder.
    fn apply(&mut self, node: NodeId, interval: Interval, delta: &Agg::Delta) {
        let mut remaining = interval;
        loop {
            let index = self.node(node).find_interval_index(remaining.start());
            let sub = self.node_interval(node, index);
            let Some(overlap) = sub.intersection(&remaining) else {
                break;
            };

            let updated = self.node(node).values[index].add_by_ref(delta);
            if updated == self.node(node).values[index] {
                // Combining is a no-op on this algebra; skip the span.
            } else if sub.is_subset_of(&remaining) {
                self.node_mut(node).values[index] = updated;
            } else if !self.node(node).is_leaf() {
                let child = self.node(node).children[index];
                self.apply(child, overlap, delta);
            } else {
                self.node_mut(node).insert(index, sub, overlap, delta);
            }

            if overlap.end() == remaining.end() {
                break;
            }
            remaining = Interval::new(overlap.end(), remaining.end());
        }
        self.rebalance(node);
    }

    /// Post-update maintenance: restore the upper size bound, compact
    /// equal adjacent runs, then restore the lower bound. The order
    /// matters — compaction can only shrink, and shrinking is what
    /// `nmerge` reacts to.
    fn rebalance(&mut self, node: NodeId) {
        if self.node(node).size() >= self.branching_factor {
            self.split(node);
        }
        while self.node_mut(node).imerge() {}
        self.nmerge(node);
    }

    /// Halves an overfull node, pushing the separator key into the
    /// parent (or promoting a new root). Returns the new right sibling.
    ///
    /// The parent's partial aggregate for the split child covered the
    /// whole child and still covers both halves, so its slot is
    /// duplicated; only a freshly promoted root starts with neutral
    /// slots, since nothing has been accounted at the new level yet.
    /// The parent is not split here even if the separator overfills it:
    /// each node restores its own bound when its frame of the descent
    /// unwinds, and the bulk loader walks the spine explicitly.
    fn split(&mut self, node: NodeId) -> NodeId {
        let size = self.node(node).size();
        debug_assert!(
            size >= self.branching_factor,
            "split of a node with only {size} keys"
        );
        // One past the number of retained left-half values.
        let half = (size + 2) / 2;

        let node_ref = self.node_mut(node);
        let right_keys = node_ref.keys.split_off(half);
        let separator = node_ref.keys.pop().expect("overfull node has keys");
        let right_values = node_ref.values.split_off(half);
        let right_children = if node_ref.is_leaf() {
            Vec::new()
        } else {
            node_ref.children.split_off(half)
        };
        let parent = node_ref.parent;

        let right = self.alloc(Node {
            keys: right_keys,
            values: right_values,
            children: right_children,
            parent,
        });
        let adopted = self.node(right).children.clone();
        for child in adopted {
            self.node_mut(child).parent = Some(right);
        }

        match parent {
            None => {
                let new_root = self.alloc(Node {
                    keys: vec![separator],
                    values: vec![Agg::Delta::zero(), Agg::Delta::zero()],
                    children: vec![node, right],
                    parent: None,
                });
                self.node_mut(node).parent = Some(new_root);
                self.node_mut(right).parent = Some(new_root);
                self.root = new_root;
                trace!("root split at key {separator}; tree grew a level");
            }
            Some(parent) => {
                let at = self.find_child_index(parent, node);
                let parent_ref = self.node_mut(parent);
                parent_ref.keys.insert(at, separator);
                let slot = parent_ref.values[at].clone();
                parent_ref.values.insert(at + 1, slot);
                parent_ref.children.insert(at + 1, right);
                trace!("node split at key {separator}");
            }
        }
        right
    }

    /// Rebalances `node` after a size decrease. A keyless interior root
    /// collapses into its only child; an underfull non-root steals from
    /// a sibling until back at the minimum, or fuses with one when no
    /// sibling can spare a key.
    ///
    /// Rebalancing never reaches above `node`'s parent here. A fusion
    /// below can leave an ancestor underfull, but every ancestor's frame
    /// of the recursive descent runs its own `nmerge` when it unwinds,
    /// so the cascade of the underflow happens level by level without
    /// ever touching a node whose frame is still live.
    fn nmerge(&mut self, node: NodeId) {
        let Some(parent) = self.node(node).parent else {
            // The root collapse: a keyless interior root takes over its
            // only child's partition, shrinking the tree by a level. The
            // root has no occupancy minimum, so nothing else applies.
            while self.node(node).size() == 0 && !self.node(node).is_leaf() {
                self.absorb_only_child(node);
            }
            return;
        };

        let min_keys = self.branching_factor.div_ceil(2) - 1;
        // A sibling can spare a key if giving one up keeps it at or
        // above the minimum with room to spare.
        let donor_keys = self.branching_factor.div_ceil(2);

        // Run compaction can strip several keys in a single update, so
        // one stolen key does not always restore the minimum.
        while self.node(node).size() < min_keys {
            let at = self.find_child_index(parent, node);
            let left = (at > 0).then(|| self.node(parent).children[at - 1]);
            let right = {
                let siblings = &self.node(parent).children;
                (at + 1 < siblings.len()).then(|| siblings[at + 1])
            };

            if let Some(right) = right {
                if self.node(right).size() > donor_keys {
                    self.borrow_from_right(node, parent, at, right);
                    continue;
                }
            }
            if let Some(left) = left {
                if self.node(left).size() > donor_keys {
                    self.borrow_from_left(node, parent, at, left);
                    continue;
                }
            }

            match (right, left) {
                (Some(right), _) => self.fuse(node, right, parent, at),
                (None, Some(left)) => self.fuse(left, node, parent, at - 1),
                // No siblings means the parent has gone keyless; the
                // parent's own unwind fuses it (or collapses the root),
                // and that fusion re-checks this node.
                (None, None) => {}
            }
            return;
        }
    }

    /// Pulls the partition of the root's only child up into the root
    /// itself, folding the root's single partial aggregate into every
    /// run. The root keeps its identity so live references stay valid.
    fn absorb_only_child(&mut self, node: NodeId) {
        debug_assert!(self.node(node).size() == 0 && !self.node(node).is_leaf());
        let child = self.node(node).children[0];
        let slot = replace(&mut self.node_mut(node).values[0], Agg::Delta::zero());

        let child_keys = std::mem::take(&mut self.node_mut(child).keys);
        let mut child_values = std::mem::take(&mut self.node_mut(child).values);
        let child_children = std::mem::take(&mut self.node_mut(child).children);
        for value in &mut child_values {
            value.add_assign_by_ref(&slot);
        }

        let node_ref = self.node_mut(node);
        node_ref.keys = child_keys;
        node_ref.values = child_values;
        node_ref.children = child_children.clone();
        for grandchild in child_children {
            self.node_mut(grandchild).parent = Some(node);
        }
        self.release(child);
        trace!("keyless node absorbed its only child");
    }

    /// Rotates the right sibling's first key/value/child through the
    /// parent into `node`.
    fn borrow_from_right(&mut self, node: NodeId, parent: NodeId, at: usize, right: NodeId) {
        // Push the parent's partial for this child down into its runs so
        // the parent slot can return to neutral.
        let parent_slot = replace(&mut self.node_mut(parent).values[at], Agg::Delta::zero());
        for value in &mut self.node_mut(node).values {
            value.add_assign_by_ref(&parent_slot);
        }

        // The stolen run's full contribution was the sibling's parent
        // slot plus its own partial; both move into the run.
        let stolen_value = self.node_mut(right).values.remove(0);
        let stolen = self.node(parent).values[at + 1].add_by_ref(&stolen_value);
        let new_separator = self.node_mut(right).keys.remove(0);
        let old_separator = replace(&mut self.node_mut(parent).keys[at], new_separator);

        let node_ref = self.node_mut(node);
        node_ref.keys.push(old_separator);
        node_ref.values.push(stolen);
        if !self.node(right).is_leaf() {
            let child = self.node_mut(right).children.remove(0);
            self.node_mut(child).parent = Some(node);
            self.node_mut(node).children.push(child);
        }
        trace!("borrowed a key from the right sibling");
    }

    /// Rotates the left sibling's last key/value/child through the
    /// parent into `node`.
    fn borrow_from_left(&mut self, node: NodeId, parent: NodeId, at: usize, left: NodeId) {
        let parent_slot = replace(&mut self.node_mut(parent).values[at], Agg::Delta::zero());
        for value in &mut self.node_mut(node).values {
            value.add_assign_by_ref(&parent_slot);
        }

        let stolen_value = self.node_mut(left).values.pop().expect("donor has values");
        let stolen = self.node(parent).values[at - 1].add_by_ref(&stolen_value);
        let new_separator = self.node_mut(left).keys.pop().expect("donor has keys");
        let old_separator = replace(&mut self.node_mut(parent).keys[at - 1], new_separator);

        let node_ref = self.node_mut(node);
        node_ref.keys.insert(0, old_separator);
        node_ref.values.insert(0, stolen);
        if !self.node(left).is_leaf() {
            let child = self.node_mut(left).children.pop().expect("donor has children");
            self.node_mut(child).parent = Some(node);
            self.node_mut(node).children.insert(0, child);
        }
        trace!("borrowed a key from the left sibling");
    }

    /// Concatenates `right` into `left` around the parent separator at
    /// `at` (the index of `left` in the parent), removing the separator
    /// and the right slot from the parent.
    fn fuse(&mut self, left: NodeId, right: NodeId, parent: NodeId, at: usize) {
        let parent_ref = self.node_mut(parent);
        let separator = parent_ref.keys.remove(at);
        let left_slot = replace(&mut parent_ref.values[at], Agg::Delta::zero());
        let right_slot = parent_ref.values.remove(at + 1);
        parent_ref.children.remove(at + 1);

        let right_keys = std::mem::take(&mut self.node_mut(right).keys);
        let right_values = std::mem::take(&mut self.node_mut(right).values);
        let right_children = std::mem::take(&mut self.node_mut(right).children);

        {
            let left_ref = self.node_mut(left);
            for value in &mut left_ref.values {
                value.add_assign_by_ref(&left_slot);
            }
            left_ref.keys.push(separator);
            left_ref.keys.extend(right_keys);
            left_ref
                .values
                .extend(right_values.into_iter().map(|value| value.add_by_ref(&right_slot)));
            left_ref.children.extend(right_children.iter().copied());
        }
        for child in right_children {
            self.node_mut(child).parent = Some(left);
        }
        self.release(right);
        trace!("fused two sibling nodes");

        // Fusing a keyless node hands over its only child, and that
        // child can arrive underfull: its own rebalance ran while it had
        // no sibling to repair with. It has siblings now, so repair it.
        // Only the keyless side can contribute such a child, the other
        // side donated at least the minimum number of keys, so the fused
        // node stays at or above the minimum through the repair.
        if !self.node(left).is_leaf() {
            let min_keys = self.branching_factor.div_ceil(2) - 1;
            let mut index = 0;
            while index < self.node(left).children.len() {
                let child = self.node(left).children[index];
                if self.node(child).size() < min_keys {
                    self.nmerge(child);
                }
                index += 1;
            }
        }
    }

    /// Checks the structural invariants over the whole tree; panics on
    /// the first violation. Test-only self-diagnostics.
    #[cfg(test)]
    fn validate(&self) {
        assert!(self.node(self.root).parent.is_none(), "root has a parent");
        self.validate_node(self.root, Interval::UNIVERSE);
    }

    #[cfg(test)]
    fn validate_node(&self, node: NodeId, bounds: Interval) {
        let node_ref = self.node(node);
        let size = node_ref.size();

        assert_eq!(node_ref.values.len(), size + 1, "values out of step with keys");
        if !node_ref.is_leaf() {
            assert_eq!(node_ref.children.len(), size + 1, "children out of step with keys");
        }
        for window in node_ref.keys.windows(2) {
            assert!(window[0] < window[1], "keys not strictly increasing");
        }
        if size > 0 {
            assert!(node_ref.keys[0] > bounds.start(), "first key escapes bounds");
            assert!(node_ref.keys[size - 1] < bounds.end(), "last key escapes bounds");
        }
        if node != self.root {
            let min_keys = self.branching_factor.div_ceil(2) - 1;
            assert!(size >= min_keys, "node below minimum occupancy");
        }
        // Splits fire at `B` keys on the next visit, so a settled node
        // holds at most `B` (a fusion under an odd `B` can land exactly
        // there).
        assert!(size <= self.branching_factor, "node above maximum occupancy");

        if !node_ref.is_leaf() {
            let intervals = self.node_intervals(node);
            assert_eq!(intervals.first().map(Interval::start), Some(bounds.start()));
            assert_eq!(intervals.last().map(Interval::end), Some(bounds.end()));
            for (index, &child) in node_ref.children.iter().enumerate() {
                assert_eq!(
                    self.node(child).parent,
                    Some(node),
                    "child's parent link does not point back"
                );
                self.validate_node(child, intervals[index]);
            }
        }
    }
}

impl<Agg> Display for SegmentTree<Agg>
where
    Agg: Aggregate,
    Agg::Delta: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn fmt_node<Agg>(
            tree: &SegmentTree<Agg>,
            f: &mut Formatter<'_>,
            node: NodeId,
            depth: usize,
        ) -> fmt::Result
        where
            Agg: Aggregate,
            Agg::Delta: Debug,
        {
            let node_ref = tree.node(node);
            writeln!(
                f,
                "{:indent$}{:?} {:?}",
                "",
                node_ref.keys,
                node_ref.values,
                indent = depth * 2
            )?;
            for &child in &node_ref.children {
                fmt_node(tree, f, child, depth + 1)?;
            }
            Ok(())
        }
        fmt_node(self, f, self.root, 0)
    }
}
