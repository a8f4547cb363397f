//! Operation catalog: the single source of truth for every operation the
//! core executes — its id, category, backend capability, payload schema,
//! and result schema.
//!
//! Adding an operation means adding a descriptor here plus a handler in
//! `cyto-handlers` (and optionally accelerator / marker support). Nothing
//! else in the workspace enumerates operations.

pub mod error;
pub mod payload;
pub mod result;

pub use error::CoreError;
pub use payload::{
    BinSpec, Condition, FieldData, FieldMap, FilterLogic, GroupValues, Method, Payload,
    PayloadField, ValueBuffer,
};
pub use result::{
    AggregateOutput, Backend, BackendState, BatchExtractOutput, BinLabelsOutput, CategoryCount,
    ComparisonOutput, ComputeTrailer, CorrelationOutput, DensityOutput, DifferentialOutput,
    Envelope, ExtractOutput, FilterOutput, GroupDistribution, HistogramOutput,
    MarkerContextOutput, MarkerGeneOutput, OpOutput, StatsOutput, TransformOutput,
};

use bitflags::bitflags;
use payload::PayloadField as F;
use serde::Serialize;

/// Closed set of operation identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationId {
    Log1p,
    Zscore,
    MinMax,
    Scale,
    Clamp,
    ExtractValues,
    BatchExtract,
    ComputeStats,
    ComputeHistogram,
    ComputeCorrelation,
    ComputeDifferential,
    AggregateCategories,
    BinValues,
    FilterCells,
    ComputeDensity,
    CompareDistributions,
    MarkersSetContext,
    MarkersComputeGene,
}

impl OperationId {
    pub const ALL: [OperationId; 18] = [
        OperationId::Log1p,
        OperationId::Zscore,
        OperationId::MinMax,
        OperationId::Scale,
        OperationId::Clamp,
        OperationId::ExtractValues,
        OperationId::BatchExtract,
        OperationId::ComputeStats,
        OperationId::ComputeHistogram,
        OperationId::ComputeCorrelation,
        OperationId::ComputeDifferential,
        OperationId::AggregateCategories,
        OperationId::BinValues,
        OperationId::FilterCells,
        OperationId::ComputeDensity,
        OperationId::CompareDistributions,
        OperationId::MarkersSetContext,
        OperationId::MarkersComputeGene,
    ];

    pub fn as_wire(&self) -> &'static str {
        match self {
            OperationId::Log1p => "LOG1P",
            OperationId::Zscore => "ZSCORE",
            OperationId::MinMax => "MINMAX",
            OperationId::Scale => "SCALE",
            OperationId::Clamp => "CLAMP",
            OperationId::ExtractValues => "EXTRACT_VALUES",
            OperationId::BatchExtract => "BATCH_EXTRACT",
            OperationId::ComputeStats => "COMPUTE_STATS",
            OperationId::ComputeHistogram => "COMPUTE_HISTOGRAM",
            OperationId::ComputeCorrelation => "COMPUTE_CORRELATION",
            OperationId::ComputeDifferential => "COMPUTE_DIFFERENTIAL",
            OperationId::AggregateCategories => "AGGREGATE_CATEGORIES",
            OperationId::BinValues => "BIN_VALUES",
            OperationId::FilterCells => "FILTER_CELLS",
            OperationId::ComputeDensity => "COMPUTE_DENSITY",
            OperationId::CompareDistributions => "COMPARE_DISTRIBUTIONS",
            OperationId::MarkersSetContext => "MARKERS_SET_CONTEXT",
            OperationId::MarkersComputeGene => "MARKERS_COMPUTE_GENE",
        }
    }

    /// Parse a wire name. This is the one place `unknown_operation` can
    /// arise: in-process callers hold a typed id and catalog lookups are
    /// total.
    pub fn from_wire(name: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_wire() == name)
            .ok_or_else(|| CoreError::UnknownOperation(name.to_string()))
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Transform,
    Statistics,
    Extraction,
    Aggregation,
    Filtering,
    Distribution,
}

bitflags! {
    /// Which non-inline backends carry a handler for an operation. Inline
    /// execution is always possible and carries no flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackendCaps: u8 {
        const ACCELERATOR = 1;
        const WORKER = 2;
    }
}

/// Frozen per-operation contract.
#[derive(Debug, Clone, Copy)]
pub struct OperationDescriptor {
    pub id: OperationId,
    pub category: Category,
    pub caps: BackendCaps,
    pub required: &'static [PayloadField],
    pub optional: &'static [PayloadField],
    pub result_fields: &'static [&'static str],
}

const ACCEL_AND_WORKER: BackendCaps = BackendCaps::ACCELERATOR.union(BackendCaps::WORKER);
const WORKER_ONLY: BackendCaps = BackendCaps::WORKER;

static DESCRIPTORS: [OperationDescriptor; 18] = [
    OperationDescriptor {
        id: OperationId::Log1p,
        category: Category::Transform,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[],
        result_fields: &["values"],
    },
    OperationDescriptor {
        id: OperationId::Zscore,
        category: Category::Transform,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[],
        result_fields: &["values", "mean", "std"],
    },
    OperationDescriptor {
        id: OperationId::MinMax,
        category: Category::Transform,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[],
        result_fields: &["values", "min", "max"],
    },
    OperationDescriptor {
        id: OperationId::Scale,
        category: Category::Transform,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values, F::Scale],
        optional: &[F::Offset],
        result_fields: &["values"],
    },
    OperationDescriptor {
        id: OperationId::Clamp,
        category: Category::Transform,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[F::Min, F::Max],
        result_fields: &["values"],
    },
    OperationDescriptor {
        id: OperationId::ExtractValues,
        category: Category::Extraction,
        caps: WORKER_ONLY,
        required: &[F::CellIndices, F::RawValues],
        optional: &[F::Categories, F::IsCategorical],
        result_fields: &["values", "validIndices", "validCount"],
    },
    OperationDescriptor {
        id: OperationId::BatchExtract,
        category: Category::Extraction,
        caps: WORKER_ONLY,
        required: &[F::CellIndices, F::Fields],
        optional: &[],
        result_fields: &["entries"],
    },
    OperationDescriptor {
        id: OperationId::ComputeStats,
        category: Category::Statistics,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[],
        result_fields: &[
            "count", "min", "max", "mean", "median", "std", "q1", "q3", "iqr", "sum", "variance",
        ],
    },
    OperationDescriptor {
        id: OperationId::ComputeHistogram,
        category: Category::Statistics,
        caps: ACCEL_AND_WORKER,
        required: &[F::Values],
        optional: &[F::Bins, F::Edges],
        result_fields: &["counts", "edges", "binWidth", "bins", "validCount"],
    },
    OperationDescriptor {
        id: OperationId::ComputeCorrelation,
        category: Category::Statistics,
        caps: WORKER_ONLY,
        required: &[F::XValues, F::YValues, F::Method],
        optional: &[],
        result_fields: &["r", "rSquared", "pValue", "n", "method", "slope", "intercept"],
    },
    OperationDescriptor {
        id: OperationId::ComputeDifferential,
        category: Category::Statistics,
        caps: WORKER_ONLY,
        required: &[F::GroupAValues, F::GroupBValues, F::Method],
        optional: &[F::Pseudocount],
        result_fields: &[
            "meanA", "meanB", "log2FoldChange", "pValue", "statistic", "nA", "nB",
        ],
    },
    OperationDescriptor {
        id: OperationId::AggregateCategories,
        category: Category::Aggregation,
        caps: WORKER_ONLY,
        required: &[F::Codes, F::Categories],
        optional: &[F::CellIndices, F::IncludePercentages],
        result_fields: &["categories", "total"],
    },
    OperationDescriptor {
        id: OperationId::BinValues,
        category: Category::Aggregation,
        caps: WORKER_ONLY,
        required: &[F::Values, F::Method],
        optional: &[F::Bins, F::Breaks],
        result_fields: &["labels", "edges"],
    },
    OperationDescriptor {
        id: OperationId::FilterCells,
        category: Category::Filtering,
        caps: WORKER_ONLY,
        required: &[F::CellIndices, F::Conditions, F::Fields],
        optional: &[F::Logic],
        result_fields: &["filtered", "filteredCount"],
    },
    OperationDescriptor {
        id: OperationId::ComputeDensity,
        category: Category::Distribution,
        caps: WORKER_ONLY,
        required: &[F::Values],
        optional: &[F::Points],
        result_fields: &["x", "y", "bandwidth"],
    },
    OperationDescriptor {
        id: OperationId::CompareDistributions,
        category: Category::Distribution,
        caps: WORKER_ONLY,
        required: &[F::Groups],
        optional: &[F::Bins, F::Points],
        result_fields: &["groups", "rangeMin", "rangeMax"],
    },
    OperationDescriptor {
        id: OperationId::MarkersSetContext,
        category: Category::Statistics,
        caps: WORKER_ONLY,
        required: &[F::Codes, F::CodeToGroup, F::GroupCount],
        optional: &[F::HistBins],
        result_fields: &["groups", "cells", "histBins"],
    },
    OperationDescriptor {
        id: OperationId::MarkersComputeGene,
        category: Category::Statistics,
        caps: WORKER_ONLY,
        required: &[F::Values, F::Method],
        optional: &[F::MinCells, F::Pseudocount],
        result_fields: &[
            "meanIn", "meanOut", "pctIn", "pctOut", "log2FoldChange", "statistic", "pValue",
            "nIn",
        ],
    },
];

/// Descriptor lookup. Total: every `OperationId` has exactly one entry.
pub fn descriptor(id: OperationId) -> &'static OperationDescriptor {
    // DESCRIPTORS is ordered to match OperationId::ALL.
    &DESCRIPTORS[id as usize]
}

pub fn is_accelerator_capable(id: OperationId) -> bool {
    descriptor(id).caps.contains(BackendCaps::ACCELERATOR)
}

pub fn is_worker_capable(id: OperationId) -> bool {
    descriptor(id).caps.contains(BackendCaps::WORKER)
}

pub fn by_category(category: Category) -> impl Iterator<Item = OperationId> {
    DESCRIPTORS
        .iter()
        .filter(move |d| d.category == category)
        .map(|d| d.id)
}

/// Populated-but-unscheduled fields found during validation. Warnings,
/// never errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub unexpected: Vec<PayloadField>,
}

/// Check a payload against an operation's schema. Missing (or null)
/// required fields fail; extra populated fields are logged and reported.
pub fn validate(id: OperationId, payload: &Payload) -> Result<ValidationReport, CoreError> {
    let desc = descriptor(id);
    let missing: Vec<&str> = desc
        .required
        .iter()
        .filter(|f| !payload.has(**f))
        .map(|f| f.name())
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::InvalidPayload(format!(
            "{id}: missing required fields [{}]",
            missing.join(", ")
        )));
    }

    let unexpected: Vec<PayloadField> = payload
        .populated()
        .into_iter()
        .filter(|f| !desc.required.contains(f) && !desc.optional.contains(f))
        .collect();
    if !unexpected.is_empty() {
        let names: Vec<&str> = unexpected.iter().map(|f| f.name()).collect();
        tracing::warn!(
            target: "catalog.validate",
            op = %id,
            fields = ?names,
            "unexpected_payload_fields"
        );
    }
    Ok(ValidationReport { unexpected })
}

/// Serializable view of the whole catalog for introspection.
pub fn introspect() -> serde_json::Value {
    let ops: Vec<serde_json::Value> = DESCRIPTORS
        .iter()
        .map(|d| {
            let fields = |list: &[PayloadField]| -> Vec<serde_json::Value> {
                list.iter()
                    .map(|f| serde_json::json!({ "name": f.name(), "type": f.ty() }))
                    .collect()
            };
            serde_json::json!({
                "id": d.id.as_wire(),
                "category": d.category,
                "acceleratorCapable": d.caps.contains(BackendCaps::ACCELERATOR),
                "workerCapable": d.caps.contains(BackendCaps::WORKER),
                "payloadFields": {
                    "required": fields(d.required),
                    "optional": fields(d.optional),
                },
                "resultFields": d.result_fields,
            })
        })
        .collect();
    serde_json::Value::Array(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_table_matches_id_order() {
        for (i, op) in OperationId::ALL.into_iter().enumerate() {
            assert_eq!(DESCRIPTORS[i].id, op, "descriptor order broken at {op}");
            assert_eq!(descriptor(op).id, op);
        }
    }

    #[test]
    fn wire_names_round_trip() {
        for op in OperationId::ALL {
            assert_eq!(OperationId::from_wire(op.as_wire()).unwrap(), op);
        }
        assert!(matches!(
            OperationId::from_wire("NO_SUCH_OP"),
            Err(CoreError::UnknownOperation(_))
        ));
    }

    #[test]
    fn transforms_are_accelerator_capable() {
        for op in by_category(Category::Transform) {
            assert!(is_accelerator_capable(op), "{op}");
            assert!(is_worker_capable(op), "{op}");
        }
        assert!(!is_accelerator_capable(OperationId::FilterCells));
        assert!(is_accelerator_capable(OperationId::ComputeStats));
        assert!(!is_accelerator_capable(OperationId::MarkersComputeGene));
    }

    #[test]
    fn validate_reports_missing_fields() {
        let err = validate(OperationId::ComputeCorrelation, &Payload::default()).unwrap_err();
        match err {
            CoreError::InvalidPayload(msg) => {
                assert!(msg.contains("xValues"));
                assert!(msg.contains("yValues"));
                assert!(msg.contains("method"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validate_warns_on_extra_fields_without_failing() {
        let payload = Payload {
            scale: Some(2.0),
            ..Payload::with_values(vec![1.0, 2.0])
        };
        let report = validate(OperationId::Log1p, &payload).unwrap();
        assert_eq!(report.unexpected, vec![PayloadField::Scale]);
    }

    #[test]
    fn every_operation_has_result_fields() {
        for op in OperationId::ALL {
            assert!(!descriptor(op).result_fields.is_empty(), "{op}");
        }
    }

    #[test]
    fn introspection_lists_every_operation() {
        let value = introspect();
        let ops = value.as_array().unwrap();
        assert_eq!(ops.len(), OperationId::ALL.len());
        assert!(ops.iter().any(|o| o["id"] == "MARKERS_COMPUTE_GENE"));
    }
}
