//! Preparation of bulk loads: a batch of value-tagged intervals is
//! reduced to a time-sorted stream of endpoint deltas.

use crate::{
    algebra::{Aggregate, GroupValue, HasZero, NegByRef},
    interval::Interval,
};
use std::{mem::replace, ops::AddAssign};

/// Emits the two endpoint deltas of every tuple — `lift(v)` at the
/// interval start, its inverse at the end — then sorts by time and
/// consolidates deltas landing on the same instant, dropping any that
/// cancel to the neutral element.
///
/// The running prefix combination of the output reproduces the aggregate
/// function of the batch: zero-width intervals cancel themselves out and
/// never appear.
pub(crate) fn endpoint_deltas<Agg: Aggregate>(
    aggregate: &Agg,
    batch: Vec<(Interval, Agg::Value)>,
) -> Vec<(u32, Agg::Delta)> {
    let mut deltas = Vec::with_capacity(batch.len() * 2);
    for (interval, value) in batch {
        let delta = aggregate.lift(value);
        deltas.push((interval.end(), delta.neg_by_ref()));
        deltas.push((interval.start(), delta));
    }
    consolidate(&mut deltas);
    deltas
}

/// Sorts `deltas` by time and combines runs of entries with equal times,
/// discarding entries whose combined delta is zero.
fn consolidate<A: GroupValue>(deltas: &mut Vec<(u32, A)>) {
    deltas.sort_unstable_by_key(|&(time, _)| time);
    deltas.dedup_by(|(time, delta), (kept_time, kept_delta)| {
        if time == kept_time {
            kept_delta.add_assign(replace(delta, A::zero()));
            true
        } else {
            false
        }
    });
    deltas.retain(|(_, delta)| !delta.is_zero());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::Sum;

    fn prepare(batch: &[(u32, u32, i64)]) -> Vec<(u32, i64)> {
        endpoint_deltas(
            &Sum::<i64>::new(),
            batch
                .iter()
                .map(|&(start, end, value)| (Interval::new(start, end), value))
                .collect(),
        )
    }

    #[test]
    fn single_tuple() {
        assert_eq!(prepare(&[(10, 40, 2)]), vec![(10, 2), (40, -2)]);
    }

    #[test]
    fn batch_sorted_and_merged() {
        let deltas = prepare(&[
            (10, 40, 2),
            (10, 30, 3),
            (20, 40, 1),
            (5, 15, 2),
            (35, 45, 4),
            (10, 50, 1),
        ]);

        assert_eq!(
            deltas,
            vec![
                (5, 2),
                (10, 6),
                (15, -2),
                (20, 1),
                (30, -3),
                (35, 4),
                (40, -3),
                (45, -4),
                (50, -1),
            ]
        );
    }

    #[test]
    fn cancelling_endpoints_disappear() {
        // Two intervals meeting at 30 with opposite deltas there.
        let deltas = prepare(&[(10, 30, 3), (30, 50, 3)]);
        assert_eq!(deltas, vec![(10, 3), (50, -3)]);
    }

    #[test]
    fn zero_width_interval_is_a_noop() {
        assert_eq!(prepare(&[(10, 10, 5)]), vec![]);
    }

    #[test]
    fn consolidate_keeps_distinct_times() {
        let mut deltas = vec![(6u32, 6i64), (1, 1), (4, 4), (5, 5), (3, 3), (2, 2)];
        consolidate(&mut deltas);
        assert_eq!(
            deltas,
            vec![(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6)]
        );
    }

    #[test]
    fn consolidate_combines_equal_times() {
        let mut deltas = vec![(1u32, 1i64), (2, 2), (3, 3), (3, 4), (5, 5)];
        consolidate(&mut deltas);
        assert_eq!(deltas, vec![(1, 1), (2, 2), (3, 7), (5, 5)]);
    }

    #[test]
    fn consolidate_drops_cancelled_times() {
        let mut deltas = vec![(1u32, 1i64), (3, 3), (3, -3), (5, 5)];
        consolidate(&mut deltas);
        assert_eq!(deltas, vec![(1, 1), (5, 5)]);
    }
}
