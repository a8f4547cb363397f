//! Adaptive histograms.
//!
//! Bin-count rules:
//! - `Auto` / `Sturges`: `ceil(log2 n) + 1`.
//! - `FreedmanDiaconis`: `ceil((max - min) / (2 * IQR * n^(-1/3)))`,
//!   falling back to a single bin when heavy ties collapse the IQR.
//! - `Count(b)`: caller-supplied.
//!
//! The final count is clamped to `[1, 100]`. Non-finite values are
//! skipped; values outside an explicit range are discarded; the upper
//! edge of the last bin is inclusive.

use crate::percentile::percentile_nearest;

/// Hard ceiling on bin counts regardless of rule outcome.
pub const MAX_BINS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinRule {
    Auto,
    Sturges,
    FreedmanDiaconis,
    Count(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub counts: Vec<u32>,
    /// `counts.len() + 1` ascending edges; `edges[0] = min`,
    /// `edges[last] = max` of the binned range.
    pub edges: Vec<f64>,
    pub bin_width: f64,
    pub valid_count: usize,
}

impl Histogram {
    pub fn empty() -> Self {
        Self {
            counts: Vec::new(),
            edges: Vec::new(),
            bin_width: 0.0,
            valid_count: 0,
        }
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }
}

fn sturges(n: usize) -> usize {
    (n as f64).log2().ceil() as usize + 1
}

fn freedman_diaconis(sorted: &[f32], min: f64, max: f64) -> usize {
    let n = sorted.len();
    let iqr = percentile_nearest(sorted, 75.0) - percentile_nearest(sorted, 25.0);
    let width = 2.0 * iqr * (n as f64).powf(-1.0 / 3.0);
    if width <= 0.0 {
        return 1;
    }
    ((max - min) / width).ceil() as usize
}

/// Histogram over the data's own `[min, max]` range.
pub fn adaptive_histogram(values: &[f32], rule: BinRule) -> Histogram {
    let mut valid: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return Histogram::empty();
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let min = f64::from(valid[0]);
    let max = f64::from(valid[valid.len() - 1]);

    let bins = match rule {
        BinRule::Auto | BinRule::Sturges => sturges(valid.len()),
        BinRule::FreedmanDiaconis => freedman_diaconis(&valid, min, max),
        BinRule::Count(b) => b,
    }
    .clamp(1, MAX_BINS);

    fill(&valid, min, max, bins)
}

/// Histogram with caller-supplied range (used for aligned per-group and
/// per-chunk histograms). Values outside `[min, max]` are discarded.
pub fn histogram_with_range(values: &[f32], min: f64, max: f64, bins: usize) -> Histogram {
    if !(min.is_finite() && max.is_finite()) || max < min || bins == 0 {
        return Histogram::empty();
    }
    let valid: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    fill(&valid, min, max, bins.clamp(1, MAX_BINS))
}

fn fill(valid: &[f32], min: f64, max: f64, bins: usize) -> Histogram {
    // Degenerate single-point range: widen to unit width so edges stay
    // strictly increasing.
    let span = if max > min { max - min } else { 1.0 };
    let width = span / bins as f64;

    let mut counts = vec![0u32; bins];
    let mut valid_count = 0usize;
    for &v in valid {
        let v = f64::from(v);
        if v < min || v > max {
            continue;
        }
        // Upper bound lands in the last bin.
        let bin = (((v - min) / width) as usize).min(bins - 1);
        counts[bin] += 1;
        valid_count += 1;
    }

    let mut edges = Vec::with_capacity(bins + 1);
    for i in 0..bins {
        edges.push(min + width * i as f64);
    }
    edges.push(min + span);

    Histogram {
        counts,
        edges,
        bin_width: width,
        valid_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_yields_empty() {
        let h = adaptive_histogram(&[], BinRule::Auto);
        assert_eq!(h.bins(), 0);
        assert_eq!(h.valid_count, 0);
    }

    #[test]
    fn auto_rule_is_sturges() {
        // 14 values: ceil(log2 14) + 1 = 5 bins.
        let values = [0.0f32, 0.0, 0.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 9.0];
        let h = adaptive_histogram(&values, BinRule::Auto);
        assert_eq!(h.bins(), 5);
        assert_eq!(h.edges.len(), 6);
        assert_eq!(h.counts.iter().sum::<u32>(), 14);
    }

    #[test]
    fn max_value_lands_in_last_bin() {
        let h = adaptive_histogram(&[0.0, 5.0, 10.0], BinRule::Count(2));
        assert_eq!(h.counts, vec![2, 1]);
    }

    #[test]
    fn all_equal_values_fall_back_to_unit_width() {
        let h = adaptive_histogram(&[3.0; 8], BinRule::FreedmanDiaconis);
        assert_eq!(h.bins(), 1);
        assert_eq!(h.counts, vec![8]);
        assert!(h.edges[1] > h.edges[0]);
    }

    #[test]
    fn explicit_range_discards_outliers() {
        let h = histogram_with_range(&[-5.0, 0.0, 1.0, 2.0, 50.0], 0.0, 2.0, 2);
        assert_eq!(h.valid_count, 3);
        assert_eq!(h.counts.iter().sum::<u32>(), 3);
    }

    #[test]
    fn bin_count_clamped_to_ceiling() {
        let values: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let h = adaptive_histogram(&values, BinRule::Count(5000));
        assert_eq!(h.bins(), MAX_BINS);
    }

    proptest! {
        // Sum of counts equals the number of in-range finite values, and
        // edges are strictly increasing with consistent total width.
        #[test]
        fn histogram_laws(
            values in proptest::collection::vec(-1e3f32..1e3, 1..500),
            bins in 1usize..60,
        ) {
            let h = adaptive_histogram(&values, BinRule::Count(bins));
            let finite = values.iter().filter(|v| v.is_finite()).count();
            prop_assert_eq!(h.counts.iter().sum::<u32>() as usize, finite);
            prop_assert_eq!(h.valid_count, finite);
            for w in h.edges.windows(2) {
                prop_assert!(w[1] > w[0]);
            }
            let total = h.edges[h.edges.len() - 1] - h.edges[0];
            prop_assert!((h.bin_width * h.bins() as f64 - total).abs() < 1e-9 * total.abs().max(1.0));
        }
    }
}
