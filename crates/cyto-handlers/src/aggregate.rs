//! Aggregation: category counting and value binning.

use crate::required;
use cyto_catalog::{
    AggregateOutput, BinLabelsOutput, BinSpec, CategoryCount, CoreError, Method, OpOutput, Payload,
};
use cyto_numeric::histogram::adaptive_histogram;
use cyto_numeric::percentile::percentile_nearest;

pub(crate) fn aggregate_categories(payload: &Payload) -> Result<OpOutput, CoreError> {
    let codes = required(payload.codes.as_deref(), "codes")?;
    let categories = required(payload.categories.as_deref(), "categories")?;
    let with_pct = payload.include_percentages.unwrap_or(false);

    let mut counts = vec![0usize; categories.len()];
    let mut total = 0usize;

    let mut tally = |code: i16| {
        if code >= 0 {
            if let Some(slot) = counts.get_mut(code as usize) {
                *slot += 1;
                total += 1;
            }
        }
    };
    match payload.cell_indices.as_deref() {
        Some(indices) => {
            for &cell in indices {
                if let Some(&code) = codes.get(cell as usize) {
                    tally(code);
                }
            }
        }
        None => {
            for &code in codes {
                tally(code);
            }
        }
    }

    let mut entries: Vec<(usize, usize)> = counts
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .collect();
    // Descending by count; equal counts keep category order.
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let categories = entries
        .into_iter()
        .map(|(idx, count)| CategoryCount {
            label: categories[idx].clone(),
            count,
            percentage: with_pct.then(|| 100.0 * count as f64 / total as f64),
        })
        .collect();
    Ok(OpOutput::Aggregate(AggregateOutput { categories, total }))
}

const MISSING_LABEL: &str = "Missing";

pub(crate) fn bin_values(payload: &Payload) -> Result<OpOutput, CoreError> {
    let values = required(payload.values.as_deref(), "values")?;
    let method = required(payload.method, "method")?;

    let edges = match method {
        Method::EqualWidth => equal_width_edges(values, payload.bins),
        Method::Quantile => quantile_edges(values, payload.bins),
        Method::Custom => custom_edges(payload.breaks.as_deref())?,
        other => {
            return Err(CoreError::InvalidPayload(format!(
                "bin values: unsupported method {}",
                other.as_wire()
            )));
        }
    };

    let labels = if edges.len() < 2 {
        vec![MISSING_LABEL.to_string(); values.len()]
    } else {
        let names = bin_labels(&edges);
        values
            .iter()
            .map(|&v| {
                if !v.is_finite() {
                    return MISSING_LABEL.to_string();
                }
                match locate_bin(&edges, f64::from(v)) {
                    Some(bin) => names[bin].clone(),
                    None => MISSING_LABEL.to_string(),
                }
            })
            .collect()
    };

    Ok(OpOutput::BinLabels(BinLabelsOutput { labels, edges }))
}

fn equal_width_edges(values: &[f32], bins: Option<BinSpec>) -> Vec<f64> {
    let rule = bins.unwrap_or(BinSpec::Auto).into();
    adaptive_histogram(values, rule).edges
}

fn quantile_edges(values: &[f32], bins: Option<BinSpec>) -> Vec<f64> {
    let bins = match bins {
        Some(BinSpec::Count(b)) if b > 0 => b,
        // Quartiles unless the caller asked for a count.
        _ => 4,
    };
    let mut valid: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if valid.is_empty() {
        return Vec::new();
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut edges = Vec::with_capacity(bins + 1);
    for i in 0..=bins {
        let e = percentile_nearest(&valid, 100.0 * i as f64 / bins as f64);
        // Ties can collapse quantiles; keep edges strictly increasing by
        // dropping duplicates (fewer, wider bins).
        if edges.last().is_none_or(|&last| e > last) {
            edges.push(e);
        }
    }
    if edges.len() < 2 {
        // Fully tied data: one unit-width bin, same convention as the
        // histogram fallback.
        let v = edges.pop().unwrap_or(0.0);
        return vec![v, v + 1.0];
    }
    edges
}

fn custom_edges(breaks: Option<&[f64]>) -> Result<Vec<f64>, CoreError> {
    let breaks = breaks.ok_or_else(|| {
        CoreError::InvalidPayload("bin values: custom method requires breaks".into())
    })?;
    if breaks.len() < 2 {
        return Err(CoreError::InvalidPayload(
            "bin values: breaks need at least two entries".into(),
        ));
    }
    if breaks.iter().any(|b| !b.is_finite()) {
        return Err(CoreError::InvalidPayload(
            "bin values: breaks must be finite".into(),
        ));
    }
    // Duplicates and negative spans are rejected outright rather than
    // silently sorted.
    if breaks.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CoreError::InvalidPayload(
            "bin values: breaks must be strictly increasing".into(),
        ));
    }
    Ok(breaks.to_vec())
}

fn bin_labels(edges: &[f64]) -> Vec<String> {
    let bins = edges.len() - 1;
    (0..bins)
        .map(|i| {
            let close = if i + 1 == bins { ']' } else { ')' };
            format!("[{}, {}{close}", trim(edges[i]), trim(edges[i + 1]))
        })
        .collect()
}

fn trim(v: f64) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Bin index for an in-range value; the final edge is inclusive.
fn locate_bin(edges: &[f64], v: f64) -> Option<usize> {
    let bins = edges.len() - 1;
    if v < edges[0] || v > edges[bins] {
        return None;
    }
    match edges.binary_search_by(|e| e.partial_cmp(&v).unwrap_or(std::cmp::Ordering::Less)) {
        Ok(i) => Some(i.min(bins - 1)),
        Err(i) => Some((i - 1).min(bins - 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sorts_descending_with_percentages() {
        let payload = Payload {
            codes: Some(vec![0, 1, 1, 2, 1, 0, -1]),
            categories: Some(vec!["alpha".into(), "beta".into(), "gamma".into()]),
            include_percentages: Some(true),
            ..Payload::default()
        };
        let out = aggregate_categories(&payload).unwrap();
        let agg = out.as_aggregate().unwrap();
        assert_eq!(agg.total, 6);
        assert_eq!(agg.categories[0].label, "beta");
        assert_eq!(agg.categories[0].count, 3);
        assert_eq!(agg.categories[1].label, "alpha");
        assert!((agg.categories[0].percentage.unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_respects_cell_subset() {
        let payload = Payload {
            codes: Some(vec![0, 1, 1, 2]),
            categories: Some(vec!["a".into(), "b".into(), "c".into()]),
            cell_indices: Some(vec![0, 3]),
            ..Payload::default()
        };
        let out = aggregate_categories(&payload).unwrap();
        let agg = out.as_aggregate().unwrap();
        assert_eq!(agg.total, 2);
        assert_eq!(agg.categories.len(), 2);
        assert!(agg.categories.iter().all(|c| c.percentage.is_none()));
    }

    #[test]
    fn equal_width_binning_labels_values() {
        let payload = Payload {
            method: Some(Method::EqualWidth),
            bins: Some(BinSpec::Count(2)),
            ..Payload::with_values(vec![0.0, 1.0, 2.0, 3.0, 4.0, f32::NAN])
        };
        let out = bin_values(&payload).unwrap();
        let b = out.as_bin_labels().unwrap();
        assert_eq!(b.edges, vec![0.0, 2.0, 4.0]);
        assert_eq!(b.labels[0], "[0, 2)");
        assert_eq!(b.labels[2], "[2, 4]");
        assert_eq!(b.labels[4], "[2, 4]");
        assert_eq!(b.labels[5], "Missing");
    }

    #[test]
    fn quantile_binning_collapses_ties() {
        let payload = Payload {
            method: Some(Method::Quantile),
            bins: Some(BinSpec::Count(4)),
            ..Payload::with_values(vec![1.0; 20])
        };
        let out = bin_values(&payload).unwrap();
        let b = out.as_bin_labels().unwrap();
        assert_eq!(b.edges.len(), 2);
        assert!(b.labels.iter().all(|l| l == "[1, 2]"));
    }

    #[test]
    fn custom_breaks_validated() {
        let ok = Payload {
            method: Some(Method::Custom),
            breaks: Some(vec![0.0, 10.0, 20.0]),
            ..Payload::with_values(vec![5.0, 15.0, 25.0])
        };
        let out = bin_values(&ok).unwrap();
        let b = out.as_bin_labels().unwrap();
        assert_eq!(b.labels[0], "[0, 10)");
        assert_eq!(b.labels[1], "[10, 20]");
        // Out of the break range counts as missing.
        assert_eq!(b.labels[2], "Missing");

        for bad_breaks in [vec![0.0, 0.0, 1.0], vec![5.0, 1.0]] {
            let bad = Payload {
                method: Some(Method::Custom),
                breaks: Some(bad_breaks),
                ..Payload::with_values(vec![1.0])
            };
            assert!(matches!(
                bin_values(&bad),
                Err(CoreError::InvalidPayload(_))
            ));
        }
    }
}
