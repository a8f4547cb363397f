//! Gaussian kernel density estimation with Scott's bandwidth rule.

use crate::moments::Moments;

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Density curve sampled at equally spaced positions over `[min, max]`.
/// Degenerate inputs (empty, constant, fewer than two samples) yield empty
/// curves with zero bandwidth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Density {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub bandwidth: f64,
}

/// Scott's rule: `h = 1.06 * sigma * n^(-1/5)`.
pub fn gaussian_kde(values: &[f32], points: usize) -> Density {
    let valid: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(f64::from)
        .collect();
    if valid.len() < 2 || points < 2 {
        return Density::default();
    }

    let mut moments = Moments::new();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in &valid {
        moments.push(v);
        min = min.min(v);
        max = max.max(v);
    }
    let sigma = moments.std();
    if sigma <= 0.0 || max <= min {
        return Density::default();
    }

    let n = valid.len() as f64;
    let h = 1.06 * sigma * n.powf(-0.2);

    let step = (max - min) / (points - 1) as f64;
    let norm = 1.0 / (n * h);
    let mut xs = Vec::with_capacity(points);
    let mut ys = Vec::with_capacity(points);
    for i in 0..points {
        let x = min + step * i as f64;
        let mut acc = 0.0;
        for &v in &valid {
            let u = (x - v) / h;
            acc += INV_SQRT_2PI * (-0.5 * u * u).exp();
        }
        xs.push(x);
        ys.push(norm * acc);
    }
    Density {
        x: xs,
        y: ys,
        bandwidth: h,
    }
}
