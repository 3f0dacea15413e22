//! An in-memory segment B-tree (SB-tree) maintaining a time-varying
//! aggregate over a dynamic multiset of value-tagged intervals.
//!
//! The tree partitions the half-open time domain `[0, u32::MAX)` into
//! maximal runs of constant aggregate value and keeps one partial
//! aggregate per run at every level, so that the true aggregate at an
//! instant is the combination of the partials along a single
//! root-to-leaf path. It answers two queries:
//!
//! * [`SegmentTree::aggregate_at`] — the aggregate in effect at one
//!   instant;
//! * [`SegmentTree::aggregate_within`] — the piecewise-constant aggregate
//!   function restricted to a query interval, as a sequence of runs.
//!
//! Intervals are added with [`SegmentTree::insert`] and removed with
//! [`SegmentTree::delete`]; a batch can be loaded into an empty tree with
//! [`SegmentTree::insert_range`]. The aggregate is pluggable: anything
//! whose deltas form a commutative group (see [`algebra::Aggregate`])
//! works, e.g. [`algebra::Sum`], [`algebra::Count`] or
//! [`algebra::Average`]. Deletion relies on the group inverse, so
//! non-invertible aggregates such as min/max are not supported.
//!
//! The structure is single-threaded; wrap it in an external lock for
//! shared access.
//!
//! # Example
//!
//! ```
//! use sbtree::{algebra::Sum, Interval, SegmentTree};
//!
//! let mut tree = SegmentTree::new(16, Sum::<i64>::new());
//! tree.insert(Interval::new(10, 40), 2);
//! tree.insert(Interval::new(20, 30), 3);
//!
//! assert_eq!(tree.aggregate_at(25), 5);
//! assert_eq!(
//!     tree.aggregate_within(Interval::new(15, 35)),
//!     vec![
//!         (Interval::new(15, 20), 2),
//!         (Interval::new(20, 30), 5),
//!         (Interval::new(30, 35), 2),
//!     ],
//! );
//!
//! tree.delete(Interval::new(20, 30), 3);
//! assert_eq!(tree.aggregate_at(25), 2);
//! ```

pub mod algebra;

mod interval;
pub use interval::Interval;

mod node;

mod bulk;

mod tree;
pub use tree::SegmentTree;
