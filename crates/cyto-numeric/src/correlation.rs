//! Pearson / Spearman correlation with the regression line.
//!
//! Pairs are included only when both entries are finite. The p-value uses
//! the t transform `t = r * sqrt((n-2)/(1-r^2))` at `n - 2` degrees of
//! freedom; a perfectly collinear sample (`1 - r^2 <= 0`) reports p = 0.

use crate::dist::t_cdf;
use crate::rank::average_ranks;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correlation {
    pub r: f64,
    pub p: f64,
    pub n: usize,
    pub slope: f64,
    pub intercept: f64,
}

impl Correlation {
    fn degenerate(n: usize) -> Self {
        Self {
            r: f64::NAN,
            p: f64::NAN,
            n,
            slope: f64::NAN,
            intercept: f64::NAN,
        }
    }
}

fn from_sums(n: usize, sx: f64, sy: f64, sxx: f64, syy: f64, sxy: f64) -> Correlation {
    if n < 3 {
        return Correlation::degenerate(n);
    }
    let nf = n as f64;
    let cov = sxy - sx * sy / nf;
    let vx = sxx - sx * sx / nf;
    let vy = syy - sy * sy / nf;
    if vx <= 0.0 || vy <= 0.0 {
        return Correlation::degenerate(n);
    }
    let r = (cov / (vx * vy).sqrt()).clamp(-1.0, 1.0);
    let slope = cov / vx;
    let intercept = (sy - slope * sx) / nf;
    let one_minus_r2 = 1.0 - r * r;
    let p = if one_minus_r2 <= 0.0 {
        0.0
    } else {
        let t = r * ((nf - 2.0) / one_minus_r2).sqrt();
        (2.0 * (1.0 - t_cdf(t.abs(), nf - 2.0))).clamp(0.0, 1.0)
    };
    Correlation {
        r,
        p,
        n,
        slope,
        intercept,
    }
}

fn pearson_f64(x: &[f64], y: &[f64]) -> Correlation {
    let n = x.len();
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y) {
        sx += a;
        sy += b;
        sxx += a * a;
        syy += b * b;
        sxy += a * b;
    }
    from_sums(n, sx, sy, sxx, syy, sxy)
}

/// Pearson r over the both-finite pairs of two equally long buffers.
pub fn pearson(x: &[f32], y: &[f32]) -> Correlation {
    let n_pairs = x.len().min(y.len());
    let mut n = 0usize;
    let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..n_pairs {
        let (a, b) = (x[i], y[i]);
        if !a.is_finite() || !b.is_finite() {
            continue;
        }
        let (a, b) = (f64::from(a), f64::from(b));
        n += 1;
        sx += a;
        sy += b;
        sxx += a * a;
        syy += b * b;
        sxy += a * b;
    }
    from_sums(n, sx, sy, sxx, syy, sxy)
}

/// Spearman rho: Pearson over tied average ranks of the valid-pair subset.
/// Slope/intercept are reported in rank space.
pub fn spearman(x: &[f32], y: &[f32]) -> Correlation {
    let n_pairs = x.len().min(y.len());
    let mut xs = Vec::with_capacity(n_pairs);
    let mut ys = Vec::with_capacity(n_pairs);
    for i in 0..n_pairs {
        if x[i].is_finite() && y[i].is_finite() {
            xs.push(f64::from(x[i]));
            ys.push(f64::from(y[i]));
        }
    }
    if xs.len() < 3 {
        return Correlation::degenerate(xs.len());
    }
    let rx = average_ranks(&xs);
    let ry = average_ranks(&ys);
    pearson_f64(&rx, &ry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_line_recovers_parameters() {
        let x: Vec<f32> = (0..50).map(|i| i as f32).collect();
        let y: Vec<f32> = x.iter().map(|v| -3.0 * v + 7.0).collect();
        let c = pearson(&x, &y);
        assert!((c.r - -1.0).abs() < 1e-6);
        assert!((c.slope - -3.0).abs() < 1e-6);
        assert!((c.intercept - 7.0).abs() < 1e-6);
        assert_eq!(c.p, 0.0);
        assert_eq!(c.n, 50);
    }

    #[test]
    fn too_few_pairs_are_nan() {
        let c = pearson(&[1.0, 2.0], &[2.0, 4.0]);
        assert!(c.r.is_nan() && c.p.is_nan());
        assert_eq!(c.n, 2);
    }

    #[test]
    fn non_finite_pairs_are_dropped() {
        let x = [1.0, 2.0, f32::NAN, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, f32::NAN, 10.0];
        let c = pearson(&x, &y);
        assert_eq!(c.n, 3);
        assert!((c.r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constant_side_is_degenerate() {
        let c = pearson(&[1.0; 10], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert!(c.r.is_nan());
    }

    #[test]
    fn pearson_reference_value() {
        // r = 12/sqrt(212) = 0.8241634, p = 0.0863 at df = 3
        // (R: cor.test(c(1,2,3,4,5), c(2,1,4,3,7))).
        let c = pearson(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 1.0, 4.0, 3.0, 7.0]);
        assert!((c.r - 0.824_163_4).abs() < 1e-6);
        assert!((c.p - 0.086_3).abs() < 2e-3);
    }

    #[test]
    fn spearman_with_ties_reference() {
        // Monotone data with ties on both sides. Tie-averaged ranks give
        // rho = 35/38 (R: cor(x, y, method = "spearman") = 0.9210526).
        let c = spearman(
            &[1.0, 1.0, 2.0, 3.0, 4.0],
            &[10.0, 20.0, 20.0, 30.0, 40.0],
        );
        assert!((c.r - 0.921_052_6).abs() < 1e-6);
        assert_eq!(c.n, 5);
    }

    #[test]
    fn spearman_is_rank_invariant() {
        // A monotone transform leaves rho untouched.
        let x: Vec<f32> = (1..30).map(|i| i as f32).collect();
        let y: Vec<f32> = x.iter().map(|v| v.powi(3)).collect();
        let c = spearman(&x, &y);
        assert!((c.r - 1.0).abs() < 1e-9);
    }
}
