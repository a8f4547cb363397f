//! Chunked fan-out: splitting one value vector across workers and
//! recombining the per-chunk results.
//!
//! Only operations whose results fold losslessly get real recombination:
//! stats fold via moment algebra, histograms sum bin-aligned counts.
//! Order statistics cannot be reconstructed from chunk summaries, so the
//! folded stats report NaN for median/q1/q3/iqr.

use cyto_catalog::{CoreError, HistogramOutput, StatsOutput};
use cyto_numeric::histogram::MAX_BINS;

/// Split into `parts` contiguous chunks (the last absorbs the remainder).
pub(crate) fn split_values(values: Vec<f32>, parts: usize) -> Vec<Vec<f32>> {
    let parts = parts.max(1);
    if parts == 1 || values.len() <= parts {
        return vec![values];
    }
    let chunk_len = values.len().div_ceil(parts);
    values.chunks(chunk_len).map(<[f32]>::to_vec).collect()
}

/// Shared bin layout for per-chunk histograms: Sturges over the full
/// vector's finite subset. `None` when nothing is finite.
pub(crate) fn aligned_edges(values: &[f32]) -> Option<Vec<f64>> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut count = 0usize;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(f64::from(v));
        max = max.max(f64::from(v));
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let bins = ((count as f64).log2().ceil() as usize + 1).clamp(1, MAX_BINS);
    let span = if max > min { max - min } else { 1.0 };
    let width = span / bins as f64;
    let mut edges = Vec::with_capacity(bins + 1);
    for i in 0..bins {
        edges.push(min + width * i as f64);
    }
    edges.push(min + span);
    Some(edges)
}

/// Fold chunk stats: counts, sums and extrema accumulate; the mean comes
/// from the totals and the variance from
/// `sum(var_i*n_i + mean_i^2*n_i) / N - mean^2`.
pub(crate) fn fold_stats(parts: &[StatsOutput]) -> StatsOutput {
    let live: Vec<&StatsOutput> = parts.iter().filter(|s| s.count > 0).collect();
    if live.is_empty() {
        return StatsOutput::empty();
    }
    let mut count = 0usize;
    let mut sum = 0.0f64;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut second_moment = 0.0f64;
    for s in &live {
        let n = s.count as f64;
        count += s.count;
        sum += s.sum;
        min = min.min(s.min);
        max = max.max(s.max);
        second_moment += s.variance * n + s.mean * s.mean * n;
    }
    let n = count as f64;
    let mean = sum / n;
    let variance = (second_moment / n - mean * mean).max(0.0);
    StatsOutput {
        count,
        min,
        max,
        mean,
        median: f64::NAN,
        std: variance.sqrt(),
        q1: f64::NAN,
        q3: f64::NAN,
        iqr: f64::NAN,
        sum,
        variance,
    }
}

/// Sum bin-aligned chunk histograms. Every chunk was produced over the
/// same caller-supplied edges, so mismatching shapes are a bookkeeping
/// fault.
pub(crate) fn fold_histograms(
    mut parts: Vec<HistogramOutput>,
) -> Result<HistogramOutput, CoreError> {
    let Some(mut folded) = parts.pop() else {
        return Err(CoreError::Internal("no histogram chunks to fold".into()));
    };
    for part in parts {
        if part.counts.len() != folded.counts.len() || part.edges != folded.edges {
            return Err(CoreError::Internal(
                "misaligned histogram chunks in fan-out".into(),
            ));
        }
        for (acc, c) in folded.counts.iter_mut().zip(&part.counts) {
            *acc += c;
        }
        folded.valid_count += part.valid_count;
    }
    Ok(folded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_covers_all_values_in_order() {
        let values: Vec<f32> = (0..103).map(|i| i as f32).collect();
        let parts = split_values(values.clone(), 4);
        assert_eq!(parts.len(), 4);
        let rejoined: Vec<f32> = parts.concat();
        assert_eq!(rejoined, values);
    }

    #[test]
    fn split_small_input_stays_whole() {
        let parts = split_values(vec![1.0, 2.0], 8);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn folded_stats_match_whole_computation() {
        let values: Vec<f32> = (0..1000).map(|i| ((i * 37) % 91) as f32 * 0.5).collect();
        let chunks = split_values(values.clone(), 4);

        let describe = |vals: &[f32]| {
            let mut m = cyto_numeric::Moments::new();
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            let mut sum = 0.0;
            for &v in vals.iter().filter(|v| v.is_finite()) {
                let vf = f64::from(v);
                m.push(vf);
                min = min.min(vf);
                max = max.max(vf);
                sum += vf;
            }
            StatsOutput {
                count: m.count(),
                min,
                max,
                mean: m.mean(),
                median: f64::NAN,
                std: m.std(),
                q1: f64::NAN,
                q3: f64::NAN,
                iqr: f64::NAN,
                sum,
                variance: m.variance(),
            }
        };

        let parts: Vec<StatsOutput> = chunks.iter().map(|c| describe(c)).collect();
        let folded = fold_stats(&parts);
        let whole = describe(&values);

        assert_eq!(folded.count, whole.count);
        assert_eq!(folded.min, whole.min);
        assert_eq!(folded.max, whole.max);
        assert!((folded.mean - whole.mean).abs() < 1e-9);
        assert!((folded.variance - whole.variance).abs() < 1e-9 * whole.variance.max(1.0));
        assert!(folded.median.is_nan());
    }

    #[test]
    fn fold_ignores_empty_chunks() {
        let parts = [StatsOutput::empty(), {
            let mut s = StatsOutput::empty();
            s.count = 2;
            s.sum = 6.0;
            s.mean = 3.0;
            s.min = 2.0;
            s.max = 4.0;
            s.variance = 1.0;
            s
        }];
        let folded = fold_stats(&parts);
        assert_eq!(folded.count, 2);
        assert_eq!(folded.mean, 3.0);
        assert!((folded.variance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn histogram_fold_sums_counts() {
        let edges = vec![0.0, 1.0, 2.0];
        let mk = |counts: Vec<u32>| HistogramOutput {
            bins: 2,
            bin_width: 1.0,
            valid_count: counts.iter().sum::<u32>() as usize,
            counts,
            edges: edges.clone(),
        };
        let folded = fold_histograms(vec![mk(vec![1, 2]), mk(vec![3, 4])]).unwrap();
        assert_eq!(folded.counts, vec![4, 6]);
        assert_eq!(folded.valid_count, 10);

        let misaligned = HistogramOutput {
            bins: 2,
            bin_width: 1.0,
            valid_count: 0,
            counts: vec![0, 0],
            edges: vec![5.0, 6.0, 7.0],
        };
        assert!(fold_histograms(vec![mk(vec![1, 1]), misaligned]).is_err());
    }

    #[test]
    fn aligned_edges_span_data() {
        let edges = aligned_edges(&[0.0, 5.0, 10.0, f32::NAN]).unwrap();
        assert_eq!(edges[0], 0.0);
        assert_eq!(edges[edges.len() - 1], 10.0);
        assert!(edges.windows(2).all(|w| w[1] > w[0]));
        assert!(aligned_edges(&[f32::NAN]).is_none());
    }
}
