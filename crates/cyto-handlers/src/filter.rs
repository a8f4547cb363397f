//! Cell filtering: AND/OR chained predicates over named fields.
//!
//! Percentile predicates are resolved once per condition id — one sorted
//! pass over the whole field — before any cell is visited, so the
//! per-cell work stays constant no matter how many cells the filter
//! scans.

use crate::required;
use ahash::AHashMap;
use cyto_catalog::{Condition, CoreError, FieldData, FilterLogic, FilterOutput, OpOutput, Payload};
use cyto_numeric::condition::{
    ConditionOp, Direction, FieldValue, PercentileThreshold, evaluate, percent_threshold,
};

pub(crate) fn filter_cells(payload: &Payload) -> Result<OpOutput, CoreError> {
    let indices = required(payload.cell_indices.as_deref(), "cellIndices")?;
    let conditions = required(payload.conditions.as_deref(), "conditions")?;
    let fields = required(payload.fields.as_ref(), "fields")?;
    let logic = payload.logic.unwrap_or_default();

    let thresholds = precompute_thresholds(conditions, fields);

    let mut filtered = Vec::new();
    for &cell in indices {
        let mut keep = matches!(logic, FilterLogic::And);
        for cond in conditions {
            let value = field_value_at(fields.get(cond.field.as_str()), cell as usize);
            let mut verdict = evaluate(&cond.op, value, thresholds.get(cond.id.as_str()));
            if cond.negate {
                verdict = !verdict;
            }
            match logic {
                FilterLogic::And => {
                    if !verdict {
                        keep = false;
                        break;
                    }
                }
                FilterLogic::Or => {
                    if verdict {
                        keep = true;
                        break;
                    }
                }
            }
        }
        if keep {
            filtered.push(cell);
        }
    }

    let filtered_count = filtered.len();
    Ok(OpOutput::Filter(FilterOutput {
        filtered,
        filtered_count,
    }))
}

/// One threshold per percentile condition, keyed by condition id and
/// computed over the condition's whole field (not the candidate subset).
fn precompute_thresholds<'a>(
    conditions: &'a [Condition],
    fields: &AHashMap<String, FieldData>,
) -> AHashMap<&'a str, PercentileThreshold> {
    let mut out = AHashMap::new();
    for cond in conditions {
        let (percent, direction) = match cond.op {
            ConditionOp::TopPercent(p) => (p, Direction::AtOrAbove),
            ConditionOp::BottomPercent(p) => (p, Direction::AtOrBelow),
            _ => continue,
        };
        let Some(numeric) = fields.get(cond.field.as_str()).and_then(|f| f.numeric.as_deref())
        else {
            tracing::warn!(
                target: "handlers.filter",
                condition = cond.id.as_str(),
                field = cond.field.as_str(),
                "percentile_condition_without_numeric_field"
            );
            continue;
        };
        out.insert(
            cond.id.as_str(),
            percent_threshold(numeric, percent, direction),
        );
    }
    out
}

fn field_value_at(field: Option<&FieldData>, cell: usize) -> FieldValue<'_> {
    let Some(field) = field else {
        return FieldValue::Null;
    };
    if field.is_categorical() {
        match field.label_at(cell) {
            Some(label) => FieldValue::Text(label),
            None => FieldValue::Null,
        }
    } else {
        match field.number_at(cell) {
            Some(v) => FieldValue::Number(v),
            None => FieldValue::Null,
        }
    }
}
