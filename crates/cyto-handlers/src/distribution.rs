//! Distribution handlers: density curves and multi-group comparison.

use crate::required;
use crate::stats::{describe, histogram_output};
use cyto_catalog::{
    BinSpec, ComparisonOutput, CoreError, DensityOutput, GroupDistribution, OpOutput, Payload,
};
use cyto_numeric::histogram::{MAX_BINS, histogram_with_range};
use cyto_numeric::kde::gaussian_kde;

pub(crate) const DEFAULT_DENSITY_POINTS: usize = 100;

pub(crate) fn compute_density(payload: &Payload) -> Result<OpOutput, CoreError> {
    let values = required(payload.values.as_deref(), "values")?;
    let points = payload.points.unwrap_or(DEFAULT_DENSITY_POINTS);
    let d = gaussian_kde(values, points);
    Ok(OpOutput::Density(DensityOutput {
        x: d.x,
        y: d.y,
        bandwidth: d.bandwidth,
    }))
}

pub(crate) fn compare_distributions(payload: &Payload) -> Result<OpOutput, CoreError> {
    let groups = required(payload.groups.as_deref(), "groups")?;
    let points = payload.points.unwrap_or(DEFAULT_DENSITY_POINTS);

    // Union range and total count drive the shared bin layout so every
    // group's histogram is directly comparable.
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut total = 0usize;
    for group in groups {
        for &v in group.values.iter().filter(|v| v.is_finite()) {
            min = min.min(f64::from(v));
            max = max.max(f64::from(v));
            total += 1;
        }
    }
    if total == 0 {
        return Ok(OpOutput::Comparison(ComparisonOutput {
            groups: Vec::new(),
            range_min: f64::NAN,
            range_max: f64::NAN,
        }));
    }

    let bins = match payload.bins {
        Some(BinSpec::Count(b)) if b > 0 => b.min(MAX_BINS),
        _ => ((total as f64).log2().ceil() as usize + 1).clamp(1, MAX_BINS),
    };

    let out_groups = groups
        .iter()
        .map(|group| GroupDistribution {
            label: group.label.clone(),
            stats: describe(&group.values),
            histogram: histogram_output(histogram_with_range(&group.values, min, max, bins)),
            density: {
                let d = gaussian_kde(&group.values, points);
                DensityOutput {
                    x: d.x,
                    y: d.y,
                    bandwidth: d.bandwidth,
                }
            },
        })
        .collect();

    Ok(OpOutput::Comparison(ComparisonOutput {
        groups: out_groups,
        range_min: min,
        range_max: max,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyto_catalog::GroupValues;

    #[test]
    fn density_defaults_to_hundred_points() {
        let payload = Payload::with_values((0..50).map(|i| i as f32).collect());
        let out = compute_density(&payload).unwrap();
        let d = out.as_density().unwrap();
        assert_eq!(d.x.len(), 100);
        assert!(d.bandwidth > 0.0);
    }

    #[test]
    fn comparison_aligns_histograms_over_union_range() {
        let payload = Payload {
            groups: Some(vec![
                GroupValues {
                    label: "low".into(),
                    values: (0..40).map(|i| i as f32 * 0.1).collect(),
                },
                GroupValues {
                    label: "high".into(),
                    values: (0..40).map(|i| 6.0 + i as f32 * 0.1).collect(),
                },
            ]),
            bins: Some(BinSpec::Count(10)),
            ..Payload::default()
        };
        let out = compare_distributions(&payload).unwrap();
        let cmp = out.as_comparison().unwrap();
        assert_eq!(cmp.groups.len(), 2);
        assert_eq!(cmp.range_min, 0.0);
        assert!((cmp.range_max - 9.9).abs() < 1e-5);
        let (a, b) = (&cmp.groups[0], &cmp.groups[1]);
        assert_eq!(a.histogram.edges, b.histogram.edges);
        assert_eq!(a.histogram.counts.iter().sum::<u32>(), 40);
        // The low group occupies the low bins only.
        assert_eq!(a.histogram.counts[9], 0);
        assert_eq!(b.histogram.counts[0], 0);
        assert!(a.stats.mean < b.stats.mean);
    }

    #[test]
    fn comparison_of_empty_groups_is_empty() {
        let payload = Payload {
            groups: Some(vec![GroupValues {
                label: "none".into(),
                values: vec![f32::NAN],
            }]),
            ..Payload::default()
        };
        let out = compare_distributions(&payload).unwrap();
        let cmp = out.as_comparison().unwrap();
        assert!(cmp.groups.is_empty());
        assert!(cmp.range_min.is_nan());
    }
}
