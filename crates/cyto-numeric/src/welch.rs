//! Welch's unequal-variance t-test from pre-collected moments.

use crate::dist::t_cdf;

/// Welch test outcome. All three fields are NaN when either side has
/// fewer than two observations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchT {
    pub t: f64,
    pub p: f64,
    pub df: f64,
}

impl WelchT {
    pub const DEGENERATE: WelchT = WelchT {
        t: f64::NAN,
        p: f64::NAN,
        df: f64::NAN,
    };
}

/// Welch's t from per-group `(n, mean, unbiased variance)`.
///
/// Degenerate cases:
/// - `n < 2` on either side: NaN triple.
/// - zero standard error (both variances zero): `(t=0, p=1, df=n1+n2-2)`,
///   the identical-groups convention.
pub fn welch_t_from_moments(
    n1: usize,
    mean1: f64,
    var1: f64,
    n2: usize,
    mean2: f64,
    var2: f64,
) -> WelchT {
    if n1 < 2 || n2 < 2 {
        return WelchT::DEGENERATE;
    }
    let a = var1 / n1 as f64;
    let b = var2 / n2 as f64;
    let se2 = a + b;
    if se2 <= 0.0 {
        return WelchT {
            t: 0.0,
            p: 1.0,
            df: (n1 + n2 - 2) as f64,
        };
    }
    let t = (mean1 - mean2) / se2.sqrt();
    // Satterthwaite degrees of freedom.
    let denom = a * a / (n1 - 1) as f64 + b * b / (n2 - 1) as f64;
    let df = if denom > 0.0 {
        se2 * se2 / denom
    } else {
        (n1 + n2 - 2) as f64
    };
    let p = (2.0 * (1.0 - t_cdf(t.abs(), df))).clamp(0.0, 1.0);
    WelchT { t, p, df }
}
