//! Operation payloads.
//!
//! The payload is a flat record of optional named fields — the union of
//! every operation's inputs — so the catalog can check required-field
//! presence generically and warn about populated fields outside an
//! operation's schema. Buffers are owned `Vec`s; moving a `Payload` into a
//! backend IS the ownership transfer, and results move buffers back.

use ahash::AHashMap;
use cyto_numeric::condition::ConditionOp;
use serde::Serialize;

/// Canonical numeric buffer: f32, non-finite = missing.
pub type ValueBuffer = Vec<f32>;

/// Named field columns for filtering and batch extraction.
pub type FieldMap = AHashMap<String, FieldData>;

/// Named field identifiers, mirrored by the `Payload` struct below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadField {
    Values,
    XValues,
    YValues,
    GroupAValues,
    GroupBValues,
    CellIndices,
    RawValues,
    Categories,
    IsCategorical,
    Codes,
    Fields,
    Conditions,
    Logic,
    Method,
    Bins,
    Points,
    Scale,
    Offset,
    Min,
    Max,
    Breaks,
    Edges,
    IncludePercentages,
    Groups,
    CodeToGroup,
    GroupCount,
    HistBins,
    MinCells,
    Pseudocount,
}

impl PayloadField {
    pub const ALL: [PayloadField; 29] = [
        PayloadField::Values,
        PayloadField::XValues,
        PayloadField::YValues,
        PayloadField::GroupAValues,
        PayloadField::GroupBValues,
        PayloadField::CellIndices,
        PayloadField::RawValues,
        PayloadField::Categories,
        PayloadField::IsCategorical,
        PayloadField::Codes,
        PayloadField::Fields,
        PayloadField::Conditions,
        PayloadField::Logic,
        PayloadField::Method,
        PayloadField::Bins,
        PayloadField::Points,
        PayloadField::Scale,
        PayloadField::Offset,
        PayloadField::Min,
        PayloadField::Max,
        PayloadField::Breaks,
        PayloadField::Edges,
        PayloadField::IncludePercentages,
        PayloadField::Groups,
        PayloadField::CodeToGroup,
        PayloadField::GroupCount,
        PayloadField::HistBins,
        PayloadField::MinCells,
        PayloadField::Pseudocount,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PayloadField::Values => "values",
            PayloadField::XValues => "xValues",
            PayloadField::YValues => "yValues",
            PayloadField::GroupAValues => "groupAValues",
            PayloadField::GroupBValues => "groupBValues",
            PayloadField::CellIndices => "cellIndices",
            PayloadField::RawValues => "rawValues",
            PayloadField::Categories => "categories",
            PayloadField::IsCategorical => "isCategorical",
            PayloadField::Codes => "codes",
            PayloadField::Fields => "fields",
            PayloadField::Conditions => "conditions",
            PayloadField::Logic => "logic",
            PayloadField::Method => "method",
            PayloadField::Bins => "bins",
            PayloadField::Points => "points",
            PayloadField::Scale => "scale",
            PayloadField::Offset => "offset",
            PayloadField::Min => "min",
            PayloadField::Max => "max",
            PayloadField::Breaks => "breaks",
            PayloadField::Edges => "edges",
            PayloadField::IncludePercentages => "includePercentages",
            PayloadField::Groups => "groups",
            PayloadField::CodeToGroup => "codeToGroup",
            PayloadField::GroupCount => "groupCount",
            PayloadField::HistBins => "histBins",
            PayloadField::MinCells => "minCells",
            PayloadField::Pseudocount => "pseudocount",
        }
    }

    /// Abstract type label for catalog introspection.
    pub fn ty(&self) -> &'static str {
        match self {
            PayloadField::Values
            | PayloadField::XValues
            | PayloadField::YValues
            | PayloadField::GroupAValues
            | PayloadField::GroupBValues
            | PayloadField::RawValues => "f32_buffer",
            PayloadField::CellIndices => "u32_buffer",
            PayloadField::Codes | PayloadField::CodeToGroup => "i16_buffer",
            PayloadField::Categories => "text_list",
            PayloadField::IsCategorical | PayloadField::IncludePercentages => "flag",
            PayloadField::Fields => "field_map",
            PayloadField::Conditions => "conditions",
            PayloadField::Logic | PayloadField::Method => "tag",
            PayloadField::Bins => "bin_spec",
            PayloadField::Points
            | PayloadField::GroupCount
            | PayloadField::HistBins
            | PayloadField::MinCells => "count",
            PayloadField::Scale
            | PayloadField::Offset
            | PayloadField::Min
            | PayloadField::Max
            | PayloadField::Pseudocount => "number",
            PayloadField::Breaks | PayloadField::Edges => "f64_buffer",
            PayloadField::Groups => "group_list",
        }
    }
}

/// Method tags shared by the operations that take one. Handlers reject a
/// tag outside their own subset as invalid payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Pearson,
    Spearman,
    Wilcox,
    TTest,
    EqualWidth,
    Quantile,
    Custom,
}

impl Method {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Method::Pearson => "pearson",
            Method::Spearman => "spearman",
            Method::Wilcox => "wilcox",
            Method::TTest => "ttest",
            Method::EqualWidth => "equal_width",
            Method::Quantile => "quantile",
            Method::Custom => "custom",
        }
    }
}

/// Bin selection for histogram-shaped operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSpec {
    Auto,
    Sturges,
    FreedmanDiaconis,
    Count(usize),
}

impl From<BinSpec> for cyto_numeric::BinRule {
    fn from(spec: BinSpec) -> Self {
        match spec {
            BinSpec::Auto => cyto_numeric::BinRule::Auto,
            BinSpec::Sturges => cyto_numeric::BinRule::Sturges,
            BinSpec::FreedmanDiaconis => cyto_numeric::BinRule::FreedmanDiaconis,
            BinSpec::Count(b) => cyto_numeric::BinRule::Count(b),
        }
    }
}

/// How chained filter conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

/// One filter predicate bound to a field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Stable id keying the precomputed percentile-threshold map.
    pub id: String,
    pub field: String,
    pub op: ConditionOp,
    pub negate: bool,
}

/// One field's column data for filtering / batch extraction. Either
/// numeric values or categorical codes + labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldData {
    pub numeric: Option<ValueBuffer>,
    pub codes: Option<Vec<i16>>,
    pub categories: Option<Vec<String>>,
}

impl FieldData {
    pub fn numeric(values: ValueBuffer) -> Self {
        Self {
            numeric: Some(values),
            ..Self::default()
        }
    }

    pub fn categorical(codes: Vec<i16>, categories: Vec<String>) -> Self {
        Self {
            codes: Some(codes),
            categories: Some(categories),
            numeric: None,
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.codes.is_some()
    }

    pub fn len(&self) -> usize {
        self.numeric
            .as_ref()
            .map(Vec::len)
            .or_else(|| self.codes.as_ref().map(Vec::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Category label at a cell, if this field is categorical and the code
    /// at that cell is valid.
    pub fn label_at(&self, cell: usize) -> Option<&str> {
        let code = *self.codes.as_ref()?.get(cell)?;
        if code < 0 {
            return None;
        }
        self.categories.as_ref()?.get(code as usize).map(String::as_str)
    }

    /// Numeric reading at a cell; `None` for out-of-range or missing.
    pub fn number_at(&self, cell: usize) -> Option<f64> {
        let v = *self.numeric.as_ref()?.get(cell)?;
        v.is_finite().then(|| f64::from(v))
    }
}

/// A labelled value group for distribution comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupValues {
    pub label: String,
    pub values: ValueBuffer,
}

/// The flat union-of-all-inputs payload record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub values: Option<ValueBuffer>,
    pub x_values: Option<ValueBuffer>,
    pub y_values: Option<ValueBuffer>,
    pub group_a_values: Option<ValueBuffer>,
    pub group_b_values: Option<ValueBuffer>,
    pub cell_indices: Option<Vec<u32>>,
    pub raw_values: Option<ValueBuffer>,
    pub categories: Option<Vec<String>>,
    pub is_categorical: Option<bool>,
    pub codes: Option<Vec<i16>>,
    pub fields: Option<FieldMap>,
    pub conditions: Option<Vec<Condition>>,
    pub logic: Option<FilterLogic>,
    pub method: Option<Method>,
    pub bins: Option<BinSpec>,
    pub points: Option<usize>,
    pub scale: Option<f32>,
    pub offset: Option<f32>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub breaks: Option<Vec<f64>>,
    pub edges: Option<Vec<f64>>,
    pub include_percentages: Option<bool>,
    pub groups: Option<Vec<GroupValues>>,
    pub code_to_group: Option<Vec<i16>>,
    pub group_count: Option<usize>,
    pub hist_bins: Option<usize>,
    pub min_cells: Option<usize>,
    pub pseudocount: Option<f64>,
}

impl Payload {
    /// Payload carrying a single value buffer — the shape most transform
    /// and statistics operations take.
    pub fn with_values(values: ValueBuffer) -> Self {
        Self {
            values: Some(values),
            ..Self::default()
        }
    }

    /// Whether a named field is populated (non-null).
    pub fn has(&self, field: PayloadField) -> bool {
        match field {
            PayloadField::Values => self.values.is_some(),
            PayloadField::XValues => self.x_values.is_some(),
            PayloadField::YValues => self.y_values.is_some(),
            PayloadField::GroupAValues => self.group_a_values.is_some(),
            PayloadField::GroupBValues => self.group_b_values.is_some(),
            PayloadField::CellIndices => self.cell_indices.is_some(),
            PayloadField::RawValues => self.raw_values.is_some(),
            PayloadField::Categories => self.categories.is_some(),
            PayloadField::IsCategorical => self.is_categorical.is_some(),
            PayloadField::Codes => self.codes.is_some(),
            PayloadField::Fields => self.fields.is_some(),
            PayloadField::Conditions => self.conditions.is_some(),
            PayloadField::Logic => self.logic.is_some(),
            PayloadField::Method => self.method.is_some(),
            PayloadField::Bins => self.bins.is_some(),
            PayloadField::Points => self.points.is_some(),
            PayloadField::Scale => self.scale.is_some(),
            PayloadField::Offset => self.offset.is_some(),
            PayloadField::Min => self.min.is_some(),
            PayloadField::Max => self.max.is_some(),
            PayloadField::Breaks => self.breaks.is_some(),
            PayloadField::Edges => self.edges.is_some(),
            PayloadField::IncludePercentages => self.include_percentages.is_some(),
            PayloadField::Groups => self.groups.is_some(),
            PayloadField::CodeToGroup => self.code_to_group.is_some(),
            PayloadField::GroupCount => self.group_count.is_some(),
            PayloadField::HistBins => self.hist_bins.is_some(),
            PayloadField::MinCells => self.min_cells.is_some(),
            PayloadField::Pseudocount => self.pseudocount.is_some(),
        }
    }

    /// Populated fields, in declaration order.
    pub fn populated(&self) -> Vec<PayloadField> {
        PayloadField::ALL
            .into_iter()
            .filter(|f| self.has(*f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_mirrors_struct_fields() {
        let mut p = Payload::with_values(vec![1.0]);
        assert!(p.has(PayloadField::Values));
        assert!(!p.has(PayloadField::Method));
        p.method = Some(Method::Pearson);
        assert!(p.has(PayloadField::Method));
        assert_eq!(p.populated(), vec![PayloadField::Values, PayloadField::Method]);
    }

    #[test]
    fn field_data_categorical_lookup() {
        let f = FieldData::categorical(vec![0, 1, -1], vec!["a".into(), "b".into()]);
        assert_eq!(f.label_at(0), Some("a"));
        assert_eq!(f.label_at(1), Some("b"));
        assert_eq!(f.label_at(2), None);
        assert_eq!(f.label_at(9), None);
        assert!(f.is_categorical());
        assert_eq!(f.len(), 3);
    }

    #[test]
    fn field_data_numeric_missing() {
        let f = FieldData::numeric(vec![1.5, f32::NAN]);
        assert_eq!(f.number_at(0), Some(1.5));
        assert_eq!(f.number_at(1), None);
        assert!(!f.is_categorical());
    }
}
