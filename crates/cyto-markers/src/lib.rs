//! Stateful marker-gene engine.
//!
//! A `MarkerContext` pins the per-cell group assignment (and all scratch
//! buffers) on one worker so that sweeping thousands of genes costs one
//! buffer transfer per gene and near-zero allocation per call:
//! `compute_gene` reuses the order permutation and histogram planes
//! allocated at set-context time.
//!
//! Statistic selection per gene:
//! - exact wilcoxon (sorted permutation, tied rank sums) while
//!   `cells <= EXACT_CELL_LIMIT`;
//! - histogram-approximate U above that, fed by per-bin counts collected
//!   during the accumulation pass;
//! - Welch's t directly from the accumulated moments.

use cyto_catalog::{CoreError, MarkerContextOutput, MarkerGeneOutput, Method};
use cyto_numeric::mannwhitney::{log1p_bin, u_test_from_histograms};
use cyto_numeric::rank::{argsort_stable, tie_runs};
use cyto_numeric::welch::welch_t_from_moments;
use tracing::debug;

/// Cell-count ceiling for the exact wilcoxon path.
pub const EXACT_CELL_LIMIT: usize = 5_000;

pub const DEFAULT_HIST_BINS: usize = 128;
pub const MIN_HIST_BINS: usize = 16;
pub const MAX_HIST_BINS: usize = 1_024;

/// Default lower bound on usable group sizes; the effective gate is
/// `max(2, min_cells)` per side.
pub const DEFAULT_MIN_CELLS: usize = 3;

pub const DEFAULT_PSEUDOCOUNT: f64 = 0.01;

/// Per-worker sweep state. Replaced wholesale by every set-context; the
/// cell count is fixed for the life of one context.
#[derive(Debug)]
pub struct MarkerContext {
    group_count: usize,
    /// Group index per cell; −1 excludes the cell from the sweep.
    cell_group: Vec<i16>,
    /// Permutation scratch for the exact wilcoxon sort.
    order_scratch: Vec<u32>,
    hist_bins: usize,
    hist_total: Vec<u32>,
    /// `group_count` planes of `hist_bins` counts each.
    hist_by_group: Vec<u32>,
    /// Per-group accumulators refilled on every gene.
    acc: Vec<GroupAcc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct GroupAcc {
    n: u32,
    sum: f64,
    sum_sq: f64,
    expressed: u32,
}

impl MarkerContext {
    /// Build a context from the set-context payload pieces.
    ///
    /// `codes[cell]` is the raw category code of a cell;
    /// `code_to_group[code]` maps it to a sweep group index or −1 to drop
    /// it. Cells whose code is out of range of the map are dropped too.
    pub fn new(
        codes: &[i16],
        code_to_group: &[i16],
        group_count: usize,
        hist_bins: Option<usize>,
    ) -> Result<Self, CoreError> {
        if group_count == 0 {
            return Err(CoreError::InvalidPayload(
                "markers context: groupCount must be positive".into(),
            ));
        }
        if codes.is_empty() {
            return Err(CoreError::InvalidPayload(
                "markers context: codes buffer is empty".into(),
            ));
        }
        let hist_bins = hist_bins
            .unwrap_or(DEFAULT_HIST_BINS)
            .clamp(MIN_HIST_BINS, MAX_HIST_BINS);

        let mut cell_group = vec![-1i16; codes.len()];
        for (slot, &code) in cell_group.iter_mut().zip(codes) {
            if code < 0 {
                continue;
            }
            if let Some(&group) = code_to_group.get(code as usize) {
                if group >= 0 {
                    if group as usize >= group_count {
                        return Err(CoreError::InvalidPayload(format!(
                            "markers context: code {code} maps to group {group} outside groupCount {group_count}"
                        )));
                    }
                    *slot = group;
                }
            }
        }

        debug!(
            target: "markers.context",
            cells = codes.len(),
            groups = group_count,
            hist_bins,
            "context_set"
        );

        Ok(Self {
            group_count,
            cell_group,
            order_scratch: Vec::with_capacity(codes.len()),
            hist_bins,
            hist_total: vec![0; hist_bins],
            hist_by_group: vec![0; group_count * hist_bins],
            acc: vec![GroupAcc::default(); group_count],
        })
    }

    pub fn cells(&self) -> usize {
        self.cell_group.len()
    }

    pub fn groups(&self) -> usize {
        self.group_count
    }

    pub fn hist_bins(&self) -> usize {
        self.hist_bins
    }

    pub fn describe(&self) -> MarkerContextOutput {
        MarkerContextOutput {
            groups: self.group_count,
            cells: self.cells(),
            hist_bins: self.hist_bins,
        }
    }

    /// Differential expression of one gene vector for every group against
    /// the rest. The vector length must match the context's cell count.
    pub fn compute_gene(
        &mut self,
        values: &[f32],
        method: Method,
        min_cells: usize,
        pseudocount: f64,
    ) -> Result<MarkerGeneOutput, CoreError> {
        if values.len() != self.cell_group.len() {
            return Err(CoreError::InvalidPayload(format!(
                "markers gene: {} values for a {}-cell context",
                values.len(),
                self.cell_group.len()
            )));
        }
        if !matches!(method, Method::Wilcox | Method::TTest) {
            return Err(CoreError::InvalidPayload(format!(
                "markers gene: unsupported method {}",
                method.as_wire()
            )));
        }

        let exact = self.cells() <= EXACT_CELL_LIMIT;
        self.accumulate(values, !exact);

        let groups = self.group_count;
        let gate = min_cells.max(2);

        // Totals across all assigned cells.
        let mut total_n: u64 = 0;
        let mut total_sum = 0.0;
        let mut total_sum_sq = 0.0;
        let mut total_expressed: u64 = 0;
        for acc in &self.acc {
            total_n += u64::from(acc.n);
            total_sum += acc.sum;
            total_sum_sq += acc.sum_sq;
            total_expressed += u64::from(acc.expressed);
        }

        let mut out = MarkerGeneOutput {
            mean_in: vec![f64::NAN; groups],
            mean_out: vec![f64::NAN; groups],
            pct_in: vec![f64::NAN; groups],
            pct_out: vec![f64::NAN; groups],
            log2_fold_change: vec![f64::NAN; groups],
            statistic: vec![f64::NAN; groups],
            p_value: vec![f64::NAN; groups],
            n_in: vec![0; groups],
        };

        for g in 0..groups {
            let acc = self.acc[g];
            let n_in = u64::from(acc.n);
            let n_out = total_n - n_in;
            out.n_in[g] = acc.n;

            let mean_in = if n_in > 0 { acc.sum / n_in as f64 } else { f64::NAN };
            let mean_out = if n_out > 0 {
                (total_sum - acc.sum) / n_out as f64
            } else {
                f64::NAN
            };
            out.mean_in[g] = mean_in;
            out.mean_out[g] = mean_out;
            if n_in > 0 {
                out.pct_in[g] = 100.0 * acc.expressed as f64 / n_in as f64;
            }
            if n_out > 0 {
                out.pct_out[g] =
                    100.0 * (total_expressed - u64::from(acc.expressed)) as f64 / n_out as f64;
            }
            if n_in > 0 && n_out > 0 {
                out.log2_fold_change[g] =
                    ((mean_in + pseudocount) / (mean_out + pseudocount)).log2();
            }

            // Degenerate groups keep means and percents but no test.
            if (n_in as usize) < gate || (n_out as usize) < gate {
                continue;
            }

            match method {
                Method::TTest => {
                    let var_in = sample_variance(acc.sum, acc.sum_sq, n_in);
                    let var_out = sample_variance(
                        total_sum - acc.sum,
                        total_sum_sq - acc.sum_sq,
                        n_out,
                    );
                    let t = welch_t_from_moments(
                        n_in as usize,
                        mean_in,
                        var_in,
                        n_out as usize,
                        mean_out,
                        var_out,
                    );
                    out.statistic[g] = t.t;
                    out.p_value[g] = t.p;
                }
                Method::Wilcox if !exact => {
                    let plane = &self.hist_by_group[g * self.hist_bins..(g + 1) * self.hist_bins];
                    let u = u_test_from_histograms(plane, &self.hist_total);
                    out.statistic[g] = u.u;
                    out.p_value[g] = u.p;
                }
                // Exact path runs below over the shared sorted permutation.
                _ => {}
            }
        }

        if matches!(method, Method::Wilcox) && exact {
            self.exact_wilcoxon(values, gate, total_n, &mut out);
        }

        Ok(out)
    }

    /// Accumulation pass: per-group n / sum / sum-of-squares / expressed
    /// counts, plus histogram planes when the approximate path will need
    /// them.
    fn accumulate(&mut self, values: &[f32], fill_histograms: bool) {
        for acc in &mut self.acc {
            *acc = GroupAcc::default();
        }
        if fill_histograms {
            self.hist_total.fill(0);
            self.hist_by_group.fill(0);
        }

        for (cell, &group) in self.cell_group.iter().enumerate() {
            if group < 0 {
                continue;
            }
            let v = values[cell];
            if !v.is_finite() {
                continue;
            }
            let g = group as usize;
            let acc = &mut self.acc[g];
            let vf = f64::from(v);
            acc.n += 1;
            acc.sum += vf;
            acc.sum_sq += vf * vf;
            if v > 0.0 {
                acc.expressed += 1;
            }
            if fill_histograms {
                let bin = log1p_bin(v, self.hist_bins);
                self.hist_total[bin] += 1;
                self.hist_by_group[g * self.hist_bins + bin] += 1;
            }
        }
    }

    /// Exact tied-rank pass shared by every group: one sort of the valid
    /// cells, then per-group rank sums accumulated over tie runs.
    fn exact_wilcoxon(
        &mut self,
        values: &[f32],
        gate: usize,
        total_n: u64,
        out: &mut MarkerGeneOutput,
    ) {
        self.order_scratch.clear();
        for (cell, &group) in self.cell_group.iter().enumerate() {
            if group >= 0 && values[cell].is_finite() {
                self.order_scratch.push(cell as u32);
            }
        }
        argsort_stable(values, &mut self.order_scratch);

        let mut rank_sum = vec![0.0f64; self.group_count];
        let order = &self.order_scratch;
        let cell_group = &self.cell_group;
        tie_runs(values, order, |start, end, avg| {
            for &cell in &order[start..end] {
                let g = cell_group[cell as usize];
                if g >= 0 {
                    rank_sum[g as usize] += avg;
                }
            }
        });

        for g in 0..self.group_count {
            let n_in = u64::from(self.acc[g].n);
            let n_out = total_n - n_in;
            if (n_in as usize) < gate || (n_out as usize) < gate {
                continue;
            }
            let n1 = n_in as f64;
            let n2 = n_out as f64;
            let u1 = rank_sum[g] - n1 * (n1 + 1.0) / 2.0;
            let u = u1.min(n1 * n2 - u1);
            let mu = n1 * n2 / 2.0;
            let sigma = (n1 * n2 * (n1 + n2 + 1.0) / 12.0).sqrt();
            let p = if sigma > 0.0 {
                let z = (u - mu) / sigma;
                (2.0 * (1.0 - cyto_numeric::normal_cdf(z.abs()))).clamp(0.0, 1.0)
            } else {
                1.0
            };
            out.statistic[g] = u;
            out.p_value[g] = p;
        }
    }
}

fn sample_variance(sum: f64, sum_sq: f64, n: u64) -> f64 {
    if n < 2 {
        return f64::NAN;
    }
    let nf = n as f64;
    ((sum_sq - sum * sum / nf) / (nf - 1.0)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two groups of `half` cells each, codes 0 and 1 mapping straight
    /// through.
    fn two_group_context(half: usize) -> MarkerContext {
        let mut codes = vec![0i16; half];
        codes.extend(vec![1i16; half]);
        MarkerContext::new(&codes, &[0, 1], 2, None).unwrap()
    }

    #[test]
    fn rejects_zero_groups_and_empty_codes() {
        assert!(matches!(
            MarkerContext::new(&[0, 1], &[0, 1], 0, None),
            Err(CoreError::InvalidPayload(_))
        ));
        assert!(matches!(
            MarkerContext::new(&[], &[0], 1, None),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn rejects_group_index_out_of_range() {
        assert!(matches!(
            MarkerContext::new(&[0, 1], &[0, 5], 2, None),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn hist_bins_are_clamped() {
        let ctx = MarkerContext::new(&[0, 1], &[0, 1], 2, Some(4)).unwrap();
        assert_eq!(ctx.hist_bins(), MIN_HIST_BINS);
        let ctx = MarkerContext::new(&[0, 1], &[0, 1], 2, Some(1 << 20)).unwrap();
        assert_eq!(ctx.hist_bins(), MAX_HIST_BINS);
        let ctx = MarkerContext::new(&[0, 1], &[0, 1], 2, None).unwrap();
        assert_eq!(ctx.hist_bins(), DEFAULT_HIST_BINS);
    }

    #[test]
    fn excluded_codes_drop_cells() {
        // Code 2 maps to -1: excluded from every group.
        let ctx = MarkerContext::new(&[0, 1, 2, 2], &[0, 1, -1], 2, None).unwrap();
        assert_eq!(ctx.cells(), 4);
        let described = ctx.describe();
        assert_eq!(described.groups, 2);
    }

    #[test]
    fn gene_length_mismatch_is_invalid() {
        let mut ctx = two_group_context(5);
        let err = ctx
            .compute_gene(&[1.0; 3], Method::Wilcox, 2, DEFAULT_PSEUDOCOUNT)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload(_)));
    }

    #[test]
    fn separated_groups_exact_path() {
        let half = 100;
        let mut ctx = two_group_context(half);
        // Group 0 expresses around 2, group 1 around 0.
        let mut gene = Vec::with_capacity(half * 2);
        for i in 0..half {
            gene.push(2.0 + (i % 7) as f32 * 0.01);
        }
        for i in 0..half {
            gene.push(0.0 + (i % 5) as f32 * 0.01);
        }

        let out = ctx
            .compute_gene(&gene, Method::Wilcox, 10, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert!(out.p_value[0] < 1e-10, "p = {}", out.p_value[0]);
        assert!(out.log2_fold_change[0] > 0.0);
        // Mirrored group: same separation, inverted fold change.
        assert!(out.p_value[1] < 1e-10);
        assert!(out.log2_fold_change[1] < 0.0);
        assert_eq!(out.n_in[0], 100);
        assert!((out.mean_in[0] - 2.03).abs() < 0.05);
        assert!(out.pct_in[0] > 99.0);
        // Group 1 expresses in 4 of 5 cells (value 0.0 every fifth).
        assert!(out.pct_in[1] < 90.0);
    }

    #[test]
    fn ttest_statistic_matches_direct_welch() {
        let mut ctx = two_group_context(50);
        let gene: Vec<f32> = (0..100).map(|i| if i < 50 { 3.0 + (i % 3) as f32 } else { 1.0 + (i % 4) as f32 }).collect();
        let out = ctx
            .compute_gene(&gene, Method::TTest, 2, DEFAULT_PSEUDOCOUNT)
            .unwrap();

        let a: Vec<f32> = gene[..50].to_vec();
        let b: Vec<f32> = gene[50..].to_vec();
        let ma = cyto_numeric::Moments::from_values(&a);
        let mb = cyto_numeric::Moments::from_values(&b);
        let direct = welch_t_from_moments(
            ma.count(),
            ma.mean(),
            ma.variance_unbiased(),
            mb.count(),
            mb.mean(),
            mb.variance_unbiased(),
        );
        assert!((out.statistic[0] - direct.t).abs() < 1e-9);
        assert!((out.p_value[0] - direct.p).abs() < 1e-9);
        // Group 1 against the rest is the sign-flipped test.
        assert!((out.statistic[1] + direct.t).abs() < 1e-9);
    }

    #[test]
    fn approximate_path_engages_above_limit() {
        let half = 3_000; // 6000 cells total > EXACT_CELL_LIMIT
        let mut ctx = two_group_context(half);
        let mut gene = Vec::with_capacity(half * 2);
        for i in 0..half {
            gene.push(3.0 + (i % 10) as f32 * 0.1);
        }
        for i in 0..half {
            gene.push(0.5 + (i % 10) as f32 * 0.1);
        }
        let out = ctx
            .compute_gene(&gene, Method::Wilcox, 2, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert!(out.p_value[0] < 1e-10);
        assert!(out.statistic[0].is_finite());
        assert!(out.log2_fold_change[0] > 0.0);
    }

    #[test]
    fn degenerate_group_keeps_means_but_no_test() {
        // Group 1 has a single cell.
        let codes = vec![0i16, 0, 0, 0, 0, 0, 1];
        let mut ctx = MarkerContext::new(&codes, &[0, 1], 2, None).unwrap();
        let gene = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 9.0];
        let out = ctx
            .compute_gene(&gene, Method::Wilcox, 2, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert!(out.statistic[1].is_nan());
        assert!(out.p_value[1].is_nan());
        assert_eq!(out.mean_in[1], 9.0);
        assert_eq!(out.pct_in[1], 100.0);
        assert_eq!(out.n_in[1], 1);
        // The big group fails the gate too: its complement is that one
        // cell.
        assert!(out.p_value[0].is_nan());
    }

    #[test]
    fn min_cells_gate_uses_floor_of_two() {
        let mut ctx = two_group_context(30);
        let gene: Vec<f32> = (0..60).map(|i| i as f32).collect();
        // min_cells = 0 still requires 2 per side.
        let out = ctx
            .compute_gene(&gene, Method::TTest, 0, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert!(out.p_value[0].is_finite());
        // A gate larger than either side suppresses the test everywhere.
        let out = ctx
            .compute_gene(&gene, Method::TTest, 31, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert!(out.p_value.iter().all(|p| p.is_nan()));
        assert!(out.mean_in.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn nan_cells_are_skipped() {
        let mut ctx = two_group_context(3);
        let gene = [1.0, f32::NAN, 3.0, 2.0, 4.0, f32::NAN];
        let out = ctx
            .compute_gene(&gene, Method::TTest, 2, DEFAULT_PSEUDOCOUNT)
            .unwrap();
        assert_eq!(out.n_in[0], 2);
        assert_eq!(out.n_in[1], 2);
        assert!((out.mean_in[0] - 2.0).abs() < 1e-9);
        assert!((out.mean_in[1] - 3.0).abs() < 1e-9);
    }
}
