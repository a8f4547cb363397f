//! Numeric primitives for the compute core.
//!
//! Every routine in this crate consumes plain `&[f32]` views, treats
//! non-finite entries as missing, and accumulates in `f64`. Nothing here
//! observes the wall clock or allocates beyond its documented outputs, so
//! all of it is callable from any backend context (inline, worker thread,
//! accelerator host side).

pub mod condition;
pub mod correlation;
pub mod dist;
pub mod histogram;
pub mod kde;
pub mod mannwhitney;
pub mod moments;
pub mod percentile;
pub mod rank;
pub mod welch;

pub use condition::{ConditionOp, CondValue, Direction, FieldValue, PercentileThreshold};
pub use correlation::{Correlation, pearson, spearman};
pub use dist::{incomplete_beta, ln_gamma, normal_cdf, t_cdf};
pub use histogram::{BinRule, Histogram, MAX_BINS, adaptive_histogram, histogram_with_range};
pub use kde::{Density, gaussian_kde};
pub use mannwhitney::{MAX_LOG, UTest, log1p_bin, u_from_histograms, u_test_exact, u_test_from_histograms};
pub use moments::Moments;
pub use percentile::{percentile_linear, percentile_nearest};
pub use rank::{argsort_stable, average_ranks, tie_runs};
pub use welch::{WelchT, welch_t_from_moments};

/// Missing-value predicate shared by every primitive: NaN and ±inf encode
/// "no measurement" in the canonical f32 buffers.
#[inline]
pub fn is_missing(v: f32) -> bool {
    !v.is_finite()
}

/// Iterate the finite entries of a buffer, widened to f64.
#[inline]
pub fn finite_values(values: &[f32]) -> impl Iterator<Item = f64> + '_ {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(f64::from)
}

/// Collect the finite entries of a buffer into a fresh f64 vector.
pub fn compact_finite(values: &[f32]) -> Vec<f64> {
    finite_values(values).collect()
}
