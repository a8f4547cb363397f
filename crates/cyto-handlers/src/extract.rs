//! Value extraction: gather a per-cell vector down to a requested cell
//! subset, dropping out-of-range indices and missing values.

use crate::required;
use ahash::AHashMap;
use cyto_catalog::{BatchExtractOutput, CoreError, ExtractOutput, FieldData, OpOutput, Payload};

pub(crate) fn extract_values(payload: &Payload) -> Result<OpOutput, CoreError> {
    let indices = required(payload.cell_indices.as_deref(), "cellIndices")?;
    let raw = required(payload.raw_values.as_deref(), "rawValues")?;
    let categorical = payload.is_categorical.unwrap_or(false);
    Ok(OpOutput::Extract(gather(indices, raw, categorical)))
}

/// Shared gather: keeps `(value, cell_index)` pairs for in-range,
/// non-missing cells. Categorical vectors carry codes widened to f32 with
/// negatives as the missing sentinel.
pub(crate) fn gather(indices: &[u32], raw: &[f32], categorical: bool) -> ExtractOutput {
    let mut values = Vec::with_capacity(indices.len());
    let mut valid_indices = Vec::with_capacity(indices.len());
    for &cell in indices {
        let Some(&v) = raw.get(cell as usize) else {
            continue;
        };
        let missing = if categorical { v < 0.0 || !v.is_finite() } else { !v.is_finite() };
        if missing {
            continue;
        }
        values.push(v);
        valid_indices.push(cell);
    }
    let valid_count = values.len();
    ExtractOutput {
        values,
        valid_indices,
        valid_count,
    }
}

pub(crate) fn batch_extract(payload: &Payload) -> Result<OpOutput, CoreError> {
    let indices = required(payload.cell_indices.as_deref(), "cellIndices")?;
    let fields = required(payload.fields.as_ref(), "fields")?;

    let mut entries = AHashMap::with_capacity(fields.len());
    for (name, field) in fields {
        entries.insert(name.clone(), extract_field(indices, field));
    }
    Ok(OpOutput::BatchExtract(BatchExtractOutput { entries }))
}

fn extract_field(indices: &[u32], field: &FieldData) -> ExtractOutput {
    if let Some(numeric) = field.numeric.as_deref() {
        return gather(indices, numeric, false);
    }
    // Categorical columns extract their codes; negative codes are missing.
    if let Some(codes) = field.codes.as_deref() {
        let mut values = Vec::with_capacity(indices.len());
        let mut valid_indices = Vec::with_capacity(indices.len());
        for &cell in indices {
            let Some(&code) = codes.get(cell as usize) else {
                continue;
            };
            if code < 0 {
                continue;
            }
            values.push(f32::from(code));
            valid_indices.push(cell);
        }
        let valid_count = values.len();
        return ExtractOutput {
            values,
            valid_indices,
            valid_count,
        };
    }
    ExtractOutput {
        values: Vec::new(),
        valid_indices: Vec::new(),
        valid_count: 0,
    }
}
