//! Result contracts: per-operation output records, the execution trailer,
//! and the envelope callers receive.

use crate::OperationId;
use ahash::AHashMap;

/// Execution substrate a request ran (or was meant to run) on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Accelerator,
    Worker,
    Inline,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Accelerator => "accelerator",
            Backend::Worker => "worker",
            Backend::Inline => "inline",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendState {
    #[default]
    Unknown,
    Available,
    Unavailable,
    Failed,
}

/// Metadata block describing how a result was produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComputeTrailer {
    pub op: OperationId,
    pub selected_backend: Backend,
    pub actual_backend: Backend,
    pub fallback_used: bool,
    pub elapsed_ms: f64,
}

/// Operation result plus its execution trailer.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub output: OpOutput,
    pub compute: ComputeTrailer,
}

/// Element-wise transform result. `mean`/`std` are populated by z-score,
/// `min`/`max` by min-max scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub values: Vec<f32>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl TransformOutput {
    pub fn plain(values: Vec<f32>) -> Self {
        Self {
            values,
            mean: None,
            std: None,
            min: None,
            max: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOutput {
    pub values: Vec<f32>,
    pub valid_indices: Vec<u32>,
    pub valid_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchExtractOutput {
    pub entries: AHashMap<String, ExtractOutput>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsOutput {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub sum: f64,
    pub variance: f64,
}

impl StatsOutput {
    /// Shape reported for empty input: zero count/sum, NaN order
    /// statistics.
    pub fn empty() -> Self {
        Self {
            count: 0,
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            median: f64::NAN,
            std: f64::NAN,
            q1: f64::NAN,
            q3: f64::NAN,
            iqr: f64::NAN,
            sum: 0.0,
            variance: f64::NAN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramOutput {
    pub counts: Vec<u32>,
    pub edges: Vec<f64>,
    pub bin_width: f64,
    pub bins: usize,
    pub valid_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationOutput {
    pub r: f64,
    pub r_squared: f64,
    pub p_value: f64,
    pub n: usize,
    pub method: crate::payload::Method,
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialOutput {
    pub mean_a: f64,
    pub mean_b: f64,
    pub log2_fold_change: f64,
    pub p_value: f64,
    pub statistic: f64,
    pub n_a: usize,
    pub n_b: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCount {
    pub label: String,
    pub count: usize,
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOutput {
    /// Sorted by count, descending; ties keep code order.
    pub categories: Vec<CategoryCount>,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinLabelsOutput {
    /// One label per input value; missing values map to `"Missing"`.
    pub labels: Vec<String>,
    pub edges: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    pub filtered: Vec<u32>,
    pub filtered_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityOutput {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub bandwidth: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupDistribution {
    pub label: String,
    pub stats: StatsOutput,
    /// Histogram over the union range, aligned across all groups.
    pub histogram: HistogramOutput,
    pub density: DensityOutput,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutput {
    pub groups: Vec<GroupDistribution>,
    pub range_min: f64,
    pub range_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerContextOutput {
    pub groups: usize,
    pub cells: usize,
    pub hist_bins: usize,
}

/// Per-group arrays sized `group_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerGeneOutput {
    pub mean_in: Vec<f64>,
    pub mean_out: Vec<f64>,
    pub pct_in: Vec<f64>,
    pub pct_out: Vec<f64>,
    pub log2_fold_change: Vec<f64>,
    pub statistic: Vec<f64>,
    pub p_value: Vec<f64>,
    pub n_in: Vec<u32>,
}

/// Tagged union over every operation's result record.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    Transform(TransformOutput),
    Extract(ExtractOutput),
    BatchExtract(BatchExtractOutput),
    Stats(StatsOutput),
    Histogram(HistogramOutput),
    Correlation(CorrelationOutput),
    Differential(DifferentialOutput),
    Aggregate(AggregateOutput),
    BinLabels(BinLabelsOutput),
    Filter(FilterOutput),
    Density(DensityOutput),
    Comparison(ComparisonOutput),
    MarkerContext(MarkerContextOutput),
    MarkerGene(MarkerGeneOutput),
}

macro_rules! output_accessors {
    ($( $as_name:ident, $into_name:ident => $variant:ident ( $ty:ty ) ),+ $(,)?) => {
        impl OpOutput {
            $(
                pub fn $as_name(&self) -> Option<&$ty> {
                    match self {
                        OpOutput::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }

                pub fn $into_name(self) -> Option<$ty> {
                    match self {
                        OpOutput::$variant(inner) => Some(inner),
                        _ => None,
                    }
                }
            )+
        }
    };
}

output_accessors! {
    as_transform, into_transform => Transform(TransformOutput),
    as_extract, into_extract => Extract(ExtractOutput),
    as_batch_extract, into_batch_extract => BatchExtract(BatchExtractOutput),
    as_stats, into_stats => Stats(StatsOutput),
    as_histogram, into_histogram => Histogram(HistogramOutput),
    as_correlation, into_correlation => Correlation(CorrelationOutput),
    as_differential, into_differential => Differential(DifferentialOutput),
    as_aggregate, into_aggregate => Aggregate(AggregateOutput),
    as_bin_labels, into_bin_labels => BinLabels(BinLabelsOutput),
    as_filter, into_filter => Filter(FilterOutput),
    as_density, into_density => Density(DensityOutput),
    as_comparison, into_comparison => Comparison(ComparisonOutput),
    as_marker_context, into_marker_context => MarkerContext(MarkerContextOutput),
    as_marker_gene, into_marker_gene => MarkerGene(MarkerGeneOutput),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_match_variant() {
        let out = OpOutput::Stats(StatsOutput::empty());
        assert!(out.as_stats().is_some());
        assert!(out.as_histogram().is_none());
        assert!(out.into_stats().is_some());
    }

    #[test]
    fn backend_labels() {
        assert_eq!(Backend::Accelerator.as_str(), "accelerator");
        assert_eq!(Backend::Inline.to_string(), "inline");
    }
}
