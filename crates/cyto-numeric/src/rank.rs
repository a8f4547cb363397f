//! Average ranks with tie handling.
//!
//! Ranks are 1-based. Equal-value runs receive the mean rank of the run,
//! and ordering within a run is stable with respect to the input index so
//! repeated calls over the same data produce identical permutations.

/// Sort the prefix `idx[..len]` of an index buffer by the values it points
/// at, ascending, stable on ties. The caller owns `idx` so the permutation
/// scratch can be reused across calls.
pub fn argsort_stable(values: &[f32], idx: &mut [u32]) {
    idx.sort_by(|&a, &b| {
        values[a as usize]
            .partial_cmp(&values[b as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
}

/// Walk tie runs over an already-sorted permutation, invoking `f` with the
/// run bounds `[start, end)` (positions into `sorted_idx`) and the average
/// 1-based rank of the run.
pub fn tie_runs<F>(values: &[f32], sorted_idx: &[u32], mut f: F)
where
    F: FnMut(usize, usize, f64),
{
    let n = sorted_idx.len();
    let mut start = 0;
    while start < n {
        let v = values[sorted_idx[start] as usize];
        let mut end = start + 1;
        while end < n && values[sorted_idx[end] as usize] == v {
            end += 1;
        }
        // Positions start..end hold ranks start+1 ..= end, mean of an
        // arithmetic run.
        let avg = (start + 1 + end) as f64 / 2.0;
        f(start, end, avg);
        start = end;
    }
}

/// Average ranks of a full f64 slice (used by the Spearman path, where the
/// valid-pair subset has already been compacted).
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut idx: Vec<u32> = (0..n as u32).collect();
    idx.sort_by(|&a, &b| {
        values[a as usize]
            .partial_cmp(&values[b as usize])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let v = values[idx[start] as usize];
        let mut end = start + 1;
        while end < n && values[idx[end] as usize] == v {
            end += 1;
        }
        let avg = (start + 1 + end) as f64 / 2.0;
        for &i in &idx[start..end] {
            ranks[i as usize] = avg;
        }
        start = end;
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn distinct_values_rank_in_order() {
        let ranks = average_ranks(&[30.0, 10.0, 20.0]);
        assert_eq!(ranks, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn tied_run_gets_mean_rank() {
        // Sorted order: 1, 2, 2, 2, 5 -> the three 2s occupy ranks 2..4,
        // mean 3.
        let ranks = average_ranks(&[2.0, 5.0, 2.0, 1.0, 2.0]);
        assert_eq!(ranks, vec![3.0, 5.0, 3.0, 1.0, 3.0]);
    }

    #[test]
    fn argsort_is_stable_on_ties() {
        let values = [1.0f32, 0.0, 1.0, 0.0];
        let mut idx: Vec<u32> = (0..4).collect();
        argsort_stable(&values, &mut idx);
        assert_eq!(idx, vec![1, 3, 0, 2]);
    }

    #[test]
    fn tie_runs_cover_whole_slice() {
        let values = [4.0f32, 4.0, 1.0, 4.0];
        let mut idx: Vec<u32> = (0..4).collect();
        argsort_stable(&values, &mut idx);
        let mut spans = Vec::new();
        tie_runs(&values, &idx, |s, e, avg| spans.push((s, e, avg)));
        assert_eq!(spans, vec![(0, 1, 1.0), (1, 4, 3.0)]);
    }

    proptest! {
        // Rank sum over n values is always n(n+1)/2 regardless of ties.
        #[test]
        fn rank_sum_is_invariant(values in proptest::collection::vec(-100i32..100, 1..300)) {
            let values: Vec<f64> = values.into_iter().map(f64::from).collect();
            let n = values.len();
            let sum: f64 = average_ranks(&values).iter().sum();
            let expect = (n * (n + 1)) as f64 / 2.0;
            prop_assert!((sum - expect).abs() < 1e-6);
        }
    }
}
