//! Single-pass running moments (Welford).
//!
//! Contract:
//! - `variance()` is the population variance `m2 / count`; the unbiased
//!   sample flavor `m2 / (count - 1)` is available separately for the
//!   t-test path.
//! - Empty accumulators report NaN mean/variance rather than erroring.
//! - `merge` combines two disjoint accumulations exactly (parallel
//!   Welford), which is what the chunked fan-out path folds with.

/// Running count / mean / M2 accumulator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Moments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate the finite entries of a buffer.
    pub fn from_values(values: &[f32]) -> Self {
        let mut m = Self::new();
        for v in values.iter().copied().filter(|v| v.is_finite()) {
            m.push(f64::from(v));
        }
        m
    }

    #[inline]
    pub fn push(&mut self, v: f64) {
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
    }

    /// Merge a disjoint accumulation into this one (Chan et al. pairwise
    /// update). Exact for the fold order the pool uses.
    pub fn merge(&mut self, other: &Moments) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n1 = self.count as f64;
        let n2 = other.count as f64;
        let total = n1 + n2;
        let delta = other.mean - self.mean;
        self.mean += delta * n2 / total;
        self.m2 += other.m2 + delta * delta * n1 * n2 / total;
        self.count += other.count;
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean of the accumulated values; NaN when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 { f64::NAN } else { self.mean }
    }

    /// Population variance `m2 / n`; NaN when empty.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Unbiased sample variance `m2 / (n - 1)`; NaN for n < 2.
    pub fn variance_unbiased(&self) -> f64 {
        if self.count < 2 {
            f64::NAN
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn naive_two_pass(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn empty_is_nan() {
        let m = Moments::new();
        assert_eq!(m.count(), 0);
        assert!(m.mean().is_nan());
        assert!(m.variance().is_nan());
    }

    #[test]
    fn skips_non_finite() {
        let m = Moments::from_values(&[1.0, f32::NAN, 2.0, f32::INFINITY, 3.0]);
        assert_eq!(m.count(), 3);
        assert!((m.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unbiased_needs_two() {
        let m = Moments::from_values(&[5.0]);
        assert!(m.variance_unbiased().is_nan());
        assert_eq!(m.variance(), 0.0);
    }

    proptest! {
        // Single-pass moments agree with the naive two-pass formula.
        #[test]
        fn welford_matches_two_pass(values in proptest::collection::vec(-1e3f64..1e3, 1..2000)) {
            let mut m = Moments::new();
            for &v in &values {
                m.push(v);
            }
            let (mean, var) = naive_two_pass(&values);
            let tol = 1e-9 * mean.abs().max(1.0);
            prop_assert!((m.mean() - mean).abs() <= tol);
            let vtol = 1e-9 * var.abs().max(1.0);
            prop_assert!((m.variance() - var).abs() <= vtol);
        }

        // Merging two disjoint accumulations equals accumulating the
        // concatenation.
        #[test]
        fn merge_equals_concat(
            a in proptest::collection::vec(-1e3f64..1e3, 0..500),
            b in proptest::collection::vec(-1e3f64..1e3, 0..500),
        ) {
            let mut left = Moments::new();
            for &v in &a { left.push(v); }
            let mut right = Moments::new();
            for &v in &b { right.push(v); }
            left.merge(&right);

            let mut whole = Moments::new();
            for &v in a.iter().chain(&b) { whole.push(v); }

            prop_assert_eq!(left.count(), whole.count());
            if whole.count() > 0 {
                prop_assert!((left.mean() - whole.mean()).abs() <= 1e-9 * whole.mean().abs().max(1.0));
                prop_assert!((left.variance() - whole.variance()).abs() <= 1e-9 * whole.variance().abs().max(1.0));
            }
        }
    }
}
