//! Predicate evaluation over a single field value.
//!
//! Percentile predicates (`TopPercent` / `BottomPercent`) never rank
//! inline: callers precompute one threshold per condition over the
//! relevant field and pass it in, so evaluation stays O(1) per cell.

/// A literal a predicate compares against.
#[derive(Debug, Clone, PartialEq)]
pub enum CondValue {
    Number(f64),
    Text(String),
}

/// Predicate variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOp {
    Equals(CondValue),
    NotEquals(CondValue),
    GreaterThan(f64),
    LessThan(f64),
    GreaterOrEqual(f64),
    LessOrEqual(f64),
    Between(f64, f64),
    In(Vec<CondValue>),
    NotIn(Vec<CondValue>),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    IsNull,
    IsNotNull,
    TopPercent(f64),
    BottomPercent(f64),
}

impl ConditionOp {
    /// True for the variants that require a precomputed threshold.
    pub fn needs_threshold(&self) -> bool {
        matches!(self, ConditionOp::TopPercent(_) | ConditionOp::BottomPercent(_))
    }
}

/// Which side of the threshold a percentile predicate keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AtOrAbove,
    AtOrBelow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileThreshold {
    pub value: f64,
    pub direction: Direction,
}

/// One field observation as seen by a predicate. Missing numeric entries
/// (non-finite) and missing category codes surface as `Null`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Number(f64),
    Text(&'a str),
    Null,
}

/// Threshold for keeping the top / bottom `percent` of a field.
///
/// `percent` is clamped to `[0, 100]`. Top keeps the `percent` largest
/// values: with n = 100 and percent = 10 the cutoff sits at the 90th
/// sorted position, admitting exactly ten entries of distinct data.
pub fn percent_threshold(values: &[f32], percent: f64, direction: Direction) -> PercentileThreshold {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return PercentileThreshold {
            value: f64::NAN,
            direction,
        };
    }
    let percent = percent.clamp(0.0, 100.0);
    let idx = match direction {
        Direction::AtOrAbove => {
            // Cutoff at the first index of the kept top slice.
            (((100.0 - percent) / 100.0 * n as f64).floor() as usize).min(n - 1)
        }
        Direction::AtOrBelow => {
            // Last index of the kept bottom slice.
            ((percent / 100.0 * n as f64).ceil() as usize).saturating_sub(1).min(n - 1)
        }
    };
    PercentileThreshold {
        value: f64::from(sorted[idx]),
        direction,
    }
}

fn number_of(value: &FieldValue<'_>) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(*n),
        _ => None,
    }
}

fn matches_literal(value: &FieldValue<'_>, lit: &CondValue) -> bool {
    match (value, lit) {
        (FieldValue::Number(n), CondValue::Number(m)) => n == m,
        (FieldValue::Text(s), CondValue::Text(t)) => *s == t.as_str(),
        _ => false,
    }
}

/// Evaluate one predicate over one field value. `threshold` must be
/// supplied for percentile variants (absent → the predicate rejects).
/// The caller applies any `negate` wrapper.
pub fn evaluate(
    op: &ConditionOp,
    value: FieldValue<'_>,
    threshold: Option<&PercentileThreshold>,
) -> bool {
    match op {
        ConditionOp::Equals(lit) => matches_literal(&value, lit),
        ConditionOp::NotEquals(lit) => {
            !matches!(value, FieldValue::Null) && !matches_literal(&value, lit)
        }
        ConditionOp::GreaterThan(rhs) => number_of(&value).is_some_and(|v| v > *rhs),
        ConditionOp::LessThan(rhs) => number_of(&value).is_some_and(|v| v < *rhs),
        ConditionOp::GreaterOrEqual(rhs) => number_of(&value).is_some_and(|v| v >= *rhs),
        ConditionOp::LessOrEqual(rhs) => number_of(&value).is_some_and(|v| v <= *rhs),
        ConditionOp::Between(lo, hi) => number_of(&value).is_some_and(|v| v >= *lo && v <= *hi),
        ConditionOp::In(set) => set.iter().any(|lit| matches_literal(&value, lit)),
        ConditionOp::NotIn(set) => {
            !matches!(value, FieldValue::Null) && !set.iter().any(|lit| matches_literal(&value, lit))
        }
        ConditionOp::Contains(needle) => {
            matches!(value, FieldValue::Text(s) if s.contains(needle.as_str()))
        }
        ConditionOp::StartsWith(prefix) => {
            matches!(value, FieldValue::Text(s) if s.starts_with(prefix.as_str()))
        }
        ConditionOp::EndsWith(suffix) => {
            matches!(value, FieldValue::Text(s) if s.ends_with(suffix.as_str()))
        }
        ConditionOp::IsNull => matches!(value, FieldValue::Null),
        ConditionOp::IsNotNull => !matches!(value, FieldValue::Null),
        ConditionOp::TopPercent(_) | ConditionOp::BottomPercent(_) => {
            let Some(th) = threshold else { return false };
            let Some(v) = number_of(&value) else {
                return false;
            };
            match th.direction {
                Direction::AtOrAbove => v >= th.value,
                Direction::AtOrBelow => v <= th.value,
            }
        }
    }
}
