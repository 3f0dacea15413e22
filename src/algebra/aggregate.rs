//! Aggregation functions a tree can maintain over its intervals.

use crate::algebra::{Avg, GroupValue, HasOne};
use std::marker::PhantomData;

/// An aggregation function over a multiset of interval-tagged values.
///
/// The tree never stores application values directly: every inserted
/// value is first *lifted* to a delta of type [`Self::Delta`], and it is
/// deltas that the tree combines along its paths. Deltas must form a
/// commutative group — [`AddByRef`](crate::algebra::AddByRef) is the
/// combine operation, [`HasZero`](crate::algebra::HasZero) supplies its
/// neutral element, and [`NegByRef`](crate::algebra::NegByRef) the
/// inverse that deletion combines with.
///
/// For linear aggregates like sum the lift is the identity. Aggregates
/// that are not linear themselves but are *quasi-linear*, like average,
/// lift into a larger delta that is (e.g. the `(sum, count)` pair
/// [`Avg`]) and reduce to the final answer at query time.
///
/// Implementations must be consistent: lifting `n` values and combining
/// the deltas in any order must describe the same multiset as applying
/// the aggregate to it directly. The tree has no way to check this.
pub trait Aggregate: Clone + 'static {
    /// Application-facing value attached to inserted intervals.
    type Value;

    /// Internal delta combined along tree paths.
    type Delta: GroupValue;

    /// The delta contributed by one occurrence of `value`.
    fn lift(&self, value: Self::Value) -> Self::Delta;
}

/// Sums inserted values; the lift is the identity.
pub struct Sum<T> {
    phantom: PhantomData<fn() -> T>,
}

impl<T> Sum<T> {
    pub const fn new() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<T> Clone for Sum<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Default for Sum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Aggregate for Sum<T>
where
    T: GroupValue,
{
    type Value = T;
    type Delta = T;

    fn lift(&self, value: T) -> T {
        value
    }
}

/// Counts interval occurrences; every insertion lifts to one.
pub struct Count<R = i64> {
    phantom: PhantomData<fn() -> R>,
}

impl<R> Count<R> {
    pub const fn new() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<R> Clone for Count<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> Default for Count<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Aggregate for Count<R>
where
    R: GroupValue + HasOne,
{
    type Value = ();
    type Delta = R;

    fn lift(&self, (): ()) -> R {
        R::one()
    }
}

/// Averages inserted values by maintaining the `(sum, count)` pair.
///
/// Point lookups and range queries return [`Avg`] deltas; callers reduce
/// them with [`Avg::compute_avg`], which yields `None` over stretches
/// covered by no interval.
pub struct Average<T, R = i64> {
    phantom: PhantomData<fn() -> (T, R)>,
}

impl<T, R> Average<T, R> {
    pub const fn new() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<T, R> Clone for Average<T, R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T, R> Default for Average<T, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R> Aggregate for Average<T, R>
where
    T: GroupValue,
    R: GroupValue + HasOne,
{
    type Value = T;
    type Delta = Avg<T, R>;

    fn lift(&self, value: T) -> Avg<T, R> {
        Avg::new(value, R::one())
    }
}
