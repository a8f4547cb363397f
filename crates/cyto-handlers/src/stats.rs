//! Statistics handlers: descriptive stats, histograms, correlation,
//! two-group differential expression.

use crate::required;
use cyto_catalog::{
    CoreError, CorrelationOutput, DifferentialOutput, HistogramOutput, Method, OpOutput, Payload,
    StatsOutput,
};
use cyto_numeric::histogram::{BinRule, Histogram, adaptive_histogram, histogram_with_range};
use cyto_numeric::percentile::{median_sorted, percentile_nearest};
use cyto_numeric::welch::welch_t_from_moments;
use cyto_numeric::{Moments, pearson, spearman, u_test_exact};

pub(crate) fn compute_stats(payload: &Payload) -> Result<OpOutput, CoreError> {
    let values = required(payload.values.as_deref(), "values")?;
    Ok(OpOutput::Stats(describe(values)))
}

/// Descriptive statistics over the finite subset. Quantiles use the
/// integer-position flavor; the median averages the two center values for
/// even counts. Variance is the population form.
pub(crate) fn describe(values: &[f32]) -> StatsOutput {
    let mut valid: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return StatsOutput::empty();
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let moments = Moments::from_values(&valid);
    let sum: f64 = valid.iter().copied().map(f64::from).sum();
    let q1 = percentile_nearest(&valid, 25.0);
    let q3 = percentile_nearest(&valid, 75.0);
    let variance = moments.variance();
    StatsOutput {
        count: valid.len(),
        min: f64::from(valid[0]),
        max: f64::from(valid[valid.len() - 1]),
        mean: sum / valid.len() as f64,
        median: median_sorted(&valid),
        std: variance.sqrt(),
        q1,
        q3,
        iqr: q3 - q1,
        sum,
        variance,
    }
}

pub(crate) fn compute_histogram(payload: &Payload) -> Result<OpOutput, CoreError> {
    let values = required(payload.values.as_deref(), "values")?;
    let histogram = if let Some(edges) = payload.edges.as_deref() {
        aligned_histogram(values, edges)?
    } else {
        let rule: BinRule = payload.bins.unwrap_or(cyto_catalog::BinSpec::Auto).into();
        adaptive_histogram(values, rule)
    };
    Ok(OpOutput::Histogram(histogram_output(histogram)))
}

/// Histogram over caller-supplied edges (the chunked fan-out path sends
/// the same edges to every chunk so counts stay bin-aligned).
fn aligned_histogram(values: &[f32], edges: &[f64]) -> Result<Histogram, CoreError> {
    if edges.len() < 2 {
        return Err(CoreError::InvalidPayload(
            "histogram: edges need at least two entries".into(),
        ));
    }
    if edges.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CoreError::InvalidPayload(
            "histogram: edges must be strictly increasing".into(),
        ));
    }
    Ok(histogram_with_range(
        values,
        edges[0],
        edges[edges.len() - 1],
        edges.len() - 1,
    ))
}

pub(crate) fn histogram_output(h: Histogram) -> HistogramOutput {
    HistogramOutput {
        bins: h.bins(),
        bin_width: h.bin_width,
        valid_count: h.valid_count,
        counts: h.counts,
        edges: h.edges,
    }
}

pub(crate) fn compute_correlation(payload: &Payload) -> Result<OpOutput, CoreError> {
    let x = required(payload.x_values.as_deref(), "xValues")?;
    let y = required(payload.y_values.as_deref(), "yValues")?;
    let method = required(payload.method, "method")?;
    let corr = match method {
        Method::Pearson => pearson(x, y),
        Method::Spearman => spearman(x, y),
        other => {
            return Err(CoreError::InvalidPayload(format!(
                "correlation: unsupported method {}",
                other.as_wire()
            )));
        }
    };
    Ok(OpOutput::Correlation(CorrelationOutput {
        r: corr.r,
        r_squared: corr.r * corr.r,
        p_value: corr.p,
        n: corr.n,
        method,
        slope: corr.slope,
        intercept: corr.intercept,
    }))
}

pub(crate) fn compute_differential(payload: &Payload) -> Result<OpOutput, CoreError> {
    let a = required(payload.group_a_values.as_deref(), "groupAValues")?;
    let b = required(payload.group_b_values.as_deref(), "groupBValues")?;
    let method = required(payload.method, "method")?;
    let pseudocount = payload.pseudocount.unwrap_or(cyto_markers::DEFAULT_PSEUDOCOUNT);

    let ma = Moments::from_values(a);
    let mb = Moments::from_values(b);
    let mean_a = ma.mean();
    let mean_b = mb.mean();

    let (statistic, p_value) = match method {
        Method::Wilcox => {
            let u = u_test_exact(a, b);
            (u.u, u.p)
        }
        Method::TTest => {
            let t = welch_t_from_moments(
                ma.count(),
                mean_a,
                ma.variance_unbiased(),
                mb.count(),
                mean_b,
                mb.variance_unbiased(),
            );
            (t.t, t.p)
        }
        other => {
            return Err(CoreError::InvalidPayload(format!(
                "differential: unsupported method {}",
                other.as_wire()
            )));
        }
    };

    Ok(OpOutput::Differential(DifferentialOutput {
        mean_a,
        mean_b,
        log2_fold_change: ((mean_a + pseudocount) / (mean_b + pseudocount)).log2(),
        p_value,
        statistic,
        n_a: ma.count(),
        n_b: mb.count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_reference_values() {
        let s = describe(&[4.0, 1.0, 3.0, 2.0]);
        assert_eq!(s.count, 4);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.sum, 10.0);
        assert!((s.variance - 1.25).abs() < 1e-12);
        assert!((s.std - 1.25f64.sqrt()).abs() < 1e-12);
        // Integer-position quartiles on [1,2,3,4]: positions 0.75 and
        // 2.25 round to indices 1 and 2.
        assert_eq!(s.q1, 2.0);
        assert_eq!(s.q3, 3.0);
        assert_eq!(s.iqr, 1.0);
    }

    #[test]
    fn describe_skips_missing_and_handles_empty() {
        let s = describe(&[f32::NAN, 5.0, f32::INFINITY]);
        assert_eq!(s.count, 1);
        assert_eq!(s.median, 5.0);

        let e = describe(&[]);
        assert_eq!(e.count, 0);
        assert!(e.mean.is_nan());
        assert_eq!(e.sum, 0.0);
    }

    #[test]
    fn histogram_auto_bins() {
        // 14 values -> ceil(log2 14) + 1 = 5 bins, 6 edges, counts sum to
        // the valid total.
        let payload = Payload::with_values(vec![
            0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 9.0,
        ]);
        let out = compute_histogram(&payload).unwrap();
        let h = out.as_histogram().unwrap();
        assert_eq!(h.bins, 5);
        assert_eq!(h.edges.len(), 6);
        assert_eq!(h.counts.iter().sum::<u32>(), 14);
    }

    #[test]
    fn histogram_aligned_edges() {
        let payload = Payload {
            edges: Some(vec![0.0, 1.0, 2.0, 3.0]),
            ..Payload::with_values(vec![0.5, 1.5, 2.5, 2.5, 9.0])
        };
        let out = compute_histogram(&payload).unwrap();
        let h = out.as_histogram().unwrap();
        assert_eq!(h.counts, vec![1, 1, 2]);
        assert_eq!(h.valid_count, 4);

        let bad = Payload {
            edges: Some(vec![0.0, 0.0, 1.0]),
            ..Payload::with_values(vec![0.5])
        };
        assert!(matches!(
            compute_histogram(&bad),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn correlation_requires_known_method() {
        let payload = Payload {
            x_values: Some(vec![1.0, 2.0, 3.0, 4.0]),
            y_values: Some(vec![2.0, 4.0, 6.0, 8.0]),
            method: Some(Method::Pearson),
            ..Payload::default()
        };
        let out = compute_correlation(&payload).unwrap();
        let c = out.as_correlation().unwrap();
        assert!((c.r - 1.0).abs() < 1e-9);
        assert!((c.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(c.method, Method::Pearson);
        assert!((c.slope - 2.0).abs() < 1e-9);

        let bad = Payload {
            method: Some(Method::Wilcox),
            ..payload
        };
        assert!(matches!(
            compute_correlation(&bad),
            Err(CoreError::InvalidPayload(_))
        ));
    }

    #[test]
    fn differential_ttest_scenario() {
        // meanA = 3, meanB = 5, log2FC = log2(3.01/5.01) ~ -0.735.
        let payload = Payload {
            group_a_values: Some(vec![1.0, 2.0, 3.0, 4.0, 5.0]),
            group_b_values: Some(vec![3.0, 4.0, 5.0, 6.0, 7.0]),
            method: Some(Method::TTest),
            ..Payload::default()
        };
        let out = compute_differential(&payload).unwrap();
        let d = out.as_differential().unwrap();
        assert_eq!(d.mean_a, 3.0);
        assert_eq!(d.mean_b, 5.0);
        assert_eq!(d.n_a, 5);
        assert_eq!(d.n_b, 5);
        assert!((d.log2_fold_change - (3.01f64 / 5.01).log2()).abs() < 1e-9);
        assert!((d.log2_fold_change + 0.735).abs() < 0.005);
        assert!((d.statistic + 2.0).abs() < 1e-9);
        // Welch at df = 8: p = 0.0805.
        assert!((d.p_value - 0.0805).abs() < 0.005);
    }

    #[test]
    fn differential_wilcox_uses_u() {
        let payload = Payload {
            group_a_values: Some(vec![1.0, 2.0, 3.0]),
            group_b_values: Some(vec![10.0, 11.0, 12.0]),
            method: Some(Method::Wilcox),
            ..Payload::default()
        };
        let out = compute_differential(&payload).unwrap();
        let d = out.as_differential().unwrap();
        assert_eq!(d.statistic, 0.0);
        assert!(d.p_value < 0.1);
        assert!(d.log2_fold_change < 0.0);
    }
}
