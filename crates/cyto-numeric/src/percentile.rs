//! Percentiles over sorted data, in both flavors the backends use.
//!
//! The inline path picks the nearest integer position; the accelerator
//! path interpolates linearly between neighbors. The two diverge by at
//! most one inter-sample gap, i.e. `(max - min) / n` on evenly spread
//! data, which is the documented cross-backend tolerance.

/// Integer-position percentile (`p` in 0..=100) over ascending data.
pub fn percentile_nearest(sorted: &[f32], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = (sorted.len() - 1) as f64 * p / 100.0;
    f64::from(sorted[pos.round() as usize])
}

/// Linearly interpolated percentile (`p` in 0..=100) over ascending data.
pub fn percentile_linear(sorted: &[f32], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = (sorted.len() - 1) as f64 * p / 100.0;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return f64::from(sorted[lo]);
    }
    let frac = pos - lo as f64;
    f64::from(sorted[lo]) + frac * (f64::from(sorted[hi]) - f64::from(sorted[lo]))
}

/// Median as the mean of the two center values for even lengths.
pub fn median_sorted(sorted: &[f32]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        f64::from(sorted[n / 2])
    } else {
        (f64::from(sorted[n / 2 - 1]) + f64::from(sorted[n / 2])) / 2.0
    }
}
