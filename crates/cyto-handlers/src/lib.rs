//! Pure per-operation handlers.
//!
//! `execute` is the single entry every backend shares: it validates the
//! payload against the catalog schema and delegates to the focused
//! sub-module for the operation's group. Handlers never observe the wall
//! clock, never mutate their inputs, and touch no backend state beyond
//! the optional marker-context slot threaded through for the stateful
//! marker operations.

mod aggregate;
mod distribution;
mod extract;
mod filter;
mod stats;
mod transform;

use cyto_catalog::{CoreError, OpOutput, OperationId, Payload};
use cyto_markers::{DEFAULT_MIN_CELLS, DEFAULT_PSEUDOCOUNT, MarkerContext};

/// Run one operation against a payload. `markers` is the owning slot for
/// the caller's marker context: set-context replaces it, gene compute
/// borrows it, every other operation ignores it.
pub fn execute(
    op: OperationId,
    payload: &Payload,
    markers: &mut Option<MarkerContext>,
) -> Result<OpOutput, CoreError> {
    cyto_catalog::validate(op, payload)?;
    match op {
        OperationId::Log1p
        | OperationId::Zscore
        | OperationId::MinMax
        | OperationId::Scale
        | OperationId::Clamp => transform::run(op, payload),
        OperationId::ExtractValues => extract::extract_values(payload),
        OperationId::BatchExtract => extract::batch_extract(payload),
        OperationId::ComputeStats => stats::compute_stats(payload),
        OperationId::ComputeHistogram => stats::compute_histogram(payload),
        OperationId::ComputeCorrelation => stats::compute_correlation(payload),
        OperationId::ComputeDifferential => stats::compute_differential(payload),
        OperationId::AggregateCategories => aggregate::aggregate_categories(payload),
        OperationId::BinValues => aggregate::bin_values(payload),
        OperationId::FilterCells => filter::filter_cells(payload),
        OperationId::ComputeDensity => distribution::compute_density(payload),
        OperationId::CompareDistributions => distribution::compare_distributions(payload),
        OperationId::MarkersSetContext => set_marker_context(payload, markers),
        OperationId::MarkersComputeGene => markers_compute_gene(payload, markers),
    }
}

fn set_marker_context(
    payload: &Payload,
    markers: &mut Option<MarkerContext>,
) -> Result<OpOutput, CoreError> {
    let codes = required(payload.codes.as_deref(), "codes")?;
    let map = required(payload.code_to_group.as_deref(), "codeToGroup")?;
    let group_count = required(payload.group_count, "groupCount")?;
    let ctx = MarkerContext::new(codes, map, group_count, payload.hist_bins)?;
    let described = ctx.describe();
    // Replacing the slot drops the previous context and all its scratch.
    *markers = Some(ctx);
    Ok(OpOutput::MarkerContext(described))
}

fn markers_compute_gene(
    payload: &Payload,
    markers: &mut Option<MarkerContext>,
) -> Result<OpOutput, CoreError> {
    let ctx = markers.as_mut().ok_or(CoreError::ContextNotSet)?;
    let values = required(payload.values.as_deref(), "values")?;
    let method = required(payload.method, "method")?;
    let min_cells = payload.min_cells.unwrap_or(DEFAULT_MIN_CELLS);
    let pseudocount = payload.pseudocount.unwrap_or(DEFAULT_PSEUDOCOUNT);
    ctx.compute_gene(values, method, min_cells, pseudocount)
        .map(OpOutput::MarkerGene)
}

/// Field access after schema validation. A `None` here means the catalog
/// schema and the handler disagree, which is a programming error we still
/// surface as invalid payload rather than panicking.
pub(crate) fn required<T>(field: Option<T>, name: &str) -> Result<T, CoreError> {
    field.ok_or_else(|| CoreError::InvalidPayload(format!("missing required field {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyto_catalog::Method;

    #[test]
    fn gene_compute_before_context_fails() {
        let mut slot = None;
        let payload = Payload {
            method: Some(Method::Wilcox),
            ..Payload::with_values(vec![1.0, 2.0])
        };
        let err = execute(OperationId::MarkersComputeGene, &payload, &mut slot).unwrap_err();
        assert_eq!(err, CoreError::ContextNotSet);
    }

    #[test]
    fn set_context_then_compute_round_trip() {
        let mut slot = None;
        let set = Payload {
            codes: Some(vec![0, 0, 1, 1]),
            code_to_group: Some(vec![0, 1]),
            group_count: Some(2),
            ..Payload::default()
        };
        let out = execute(OperationId::MarkersSetContext, &set, &mut slot).unwrap();
        let ctx = out.as_marker_context().unwrap();
        assert_eq!(ctx.groups, 2);
        assert_eq!(ctx.cells, 4);
        assert!(slot.is_some());

        let gene = Payload {
            method: Some(Method::TTest),
            min_cells: Some(2),
            ..Payload::with_values(vec![5.0, 6.0, 1.0, 2.0])
        };
        let out = execute(OperationId::MarkersComputeGene, &gene, &mut slot).unwrap();
        let genes = out.as_marker_gene().unwrap();
        assert_eq!(genes.mean_in[0], 5.5);
        assert_eq!(genes.mean_in[1], 1.5);
    }

    #[test]
    fn set_context_replaces_previous() {
        let mut slot = None;
        for cells in [4usize, 6] {
            let set = Payload {
                codes: Some(vec![0; cells]),
                code_to_group: Some(vec![0]),
                group_count: Some(1),
                ..Payload::default()
            };
            execute(OperationId::MarkersSetContext, &set, &mut slot).unwrap();
        }
        assert_eq!(slot.as_ref().unwrap().cells(), 6);
    }

    /// Running a pure operation twice yields structurally equal results.
    #[test]
    fn handlers_are_deterministic() {
        let mut slot = None;
        // NaN-free input so structural equality is exact equality.
        let payload = Payload::with_values(vec![0.5, 3.0, 1.0, 7.5, 2.0]);
        for op in [
            OperationId::Log1p,
            OperationId::Zscore,
            OperationId::MinMax,
            OperationId::ComputeStats,
            OperationId::ComputeHistogram,
            OperationId::ComputeDensity,
        ] {
            let a = execute(op, &payload, &mut slot).unwrap();
            let b = execute(op, &payload, &mut slot).unwrap();
            assert_eq!(a, b, "{op} not deterministic");
        }
    }
}
