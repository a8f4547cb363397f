//! Element-wise transforms.
//!
//! Output length always equals input length and non-finite positions stay
//! non-finite. Z-score with zero spread and min-max with zero range emit
//! 0.0 at finite positions while still reporting the computed moments /
//! extrema in the result.

use crate::required;
use cyto_catalog::{CoreError, OpOutput, OperationId, Payload, TransformOutput};
use cyto_numeric::Moments;

pub(crate) fn run(op: OperationId, payload: &Payload) -> Result<OpOutput, CoreError> {
    let values = required(payload.values.as_deref(), "values")?;
    let output = match op {
        OperationId::Log1p => log1p(values),
        OperationId::Zscore => zscore(values),
        OperationId::MinMax => minmax(values),
        OperationId::Scale => {
            let scale = required(payload.scale, "scale")?;
            scale_offset(values, scale, payload.offset.unwrap_or(0.0))
        }
        OperationId::Clamp => clamp(values, payload.min, payload.max)?,
        other => {
            return Err(CoreError::InvalidPayload(format!(
                "{other} is not a transform"
            )));
        }
    };
    Ok(OpOutput::Transform(output))
}

fn log1p(values: &[f32]) -> TransformOutput {
    let out = values
        .iter()
        .map(|&v| if v.is_finite() { v.ln_1p() } else { f32::NAN })
        .collect();
    TransformOutput::plain(out)
}

fn zscore(values: &[f32]) -> TransformOutput {
    let moments = Moments::from_values(values);
    let mean = moments.mean();
    let std = moments.std();
    let out = values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                f32::NAN
            } else if std > 0.0 {
                ((f64::from(v) - mean) / std) as f32
            } else {
                0.0
            }
        })
        .collect();
    TransformOutput {
        values: out,
        mean: Some(mean),
        std: Some(std),
        min: None,
        max: None,
    }
}

fn minmax(values: &[f32]) -> TransformOutput {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(f64::from(v));
        max = max.max(f64::from(v));
    }
    let range = max - min;
    let out = values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                f32::NAN
            } else if range > 0.0 {
                ((f64::from(v) - min) / range) as f32
            } else {
                0.0
            }
        })
        .collect();
    let seen_any = min.is_finite();
    TransformOutput {
        values: out,
        mean: None,
        std: None,
        min: Some(if seen_any { min } else { f64::NAN }),
        max: Some(if seen_any { max } else { f64::NAN }),
    }
}

fn scale_offset(values: &[f32], scale: f32, offset: f32) -> TransformOutput {
    let out = values
        .iter()
        .map(|&v| if v.is_finite() { v * scale + offset } else { f32::NAN })
        .collect();
    TransformOutput::plain(out)
}

fn clamp(values: &[f32], min: Option<f32>, max: Option<f32>) -> Result<TransformOutput, CoreError> {
    let lo = min.unwrap_or(f32::NEG_INFINITY);
    let hi = max.unwrap_or(f32::INFINITY);
    if lo > hi {
        return Err(CoreError::InvalidPayload(format!(
            "clamp: min {lo} exceeds max {hi}"
        )));
    }
    let out = values
        .iter()
        .map(|&v| if v.is_finite() { v.clamp(lo, hi) } else { f32::NAN })
        .collect();
    Ok(TransformOutput::plain(out))
}
