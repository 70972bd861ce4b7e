// ============================================================
// Layer 3 — Declared Schema
// ============================================================
// Tabular data is not loosely typed here: every Dataset carries
// a Schema mapping column names to a semantic kind, and every
// stage boundary checks it.
//
//   Numeric     — f64 values, filled with a median, capped, scaled
//   Categorical — string values, filled with a mode, one-hot encoded
//
// A cell is a Value. Missing cells are explicit (Value::Missing),
// never NaN, so "missing" and "broken" stay distinguishable.

use serde::{Deserialize, Serialize};

use crate::domain::dataset::PartitionTag;
use crate::domain::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ColumnKind::Numeric }
    }

    pub fn categorical(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: ColumnKind::Categorical }
    }
}

/// One cell of a Dataset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Number(f64),
    Category(String),
    Missing,
}

impl Value {
    pub fn category(s: impl Into<String>) -> Self {
        Value::Category(s.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_category(&self) -> Option<&str> {
        match self {
            Value::Category(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True when the value is Missing or matches `kind`.
    pub fn fits(&self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (Value::Missing, _)
                | (Value::Number(_), ColumnKind::Numeric)
                | (Value::Category(_), ColumnKind::Categorical)
        )
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::Number).unwrap_or(Value::Missing)
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map(Value::Category).unwrap_or(Value::Missing)
    }
}

/// Ordered list of columns shared by every row of a Dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    /// Append a column, returning the extended schema.
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = (usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Numeric)
    }

    pub fn categorical_columns(&self) -> impl Iterator<Item = (usize, &Column)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Categorical)
    }

    /// Fail with a SchemaError naming the first absent or mistyped column.
    pub fn require(
        &self,
        partition: PartitionTag,
        required:  &[(&str, ColumnKind)],
    ) -> PipelineResult<()> {
        for (name, kind) in required {
            match self.kind_of(name) {
                None => {
                    return Err(PipelineError::schema(
                        partition,
                        format!("required column '{name}' is absent"),
                    ))
                }
                Some(k) if k != *kind => {
                    return Err(PipelineError::schema(
                        partition,
                        format!("column '{name}' is {k:?}, expected {kind:?}"),
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Schema-consistency check between two partitions.
    /// `partition` is the side being checked against `self`.
    pub fn ensure_matches(&self, other: &Schema, partition: PartitionTag) -> PipelineResult<()> {
        if self == other {
            return Ok(());
        }
        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| !other.columns.contains(c))
            .map(|c| c.name.as_str())
            .collect();
        let extra: Vec<&str> = other
            .columns
            .iter()
            .filter(|c| !self.columns.contains(c))
            .map(|c| c.name.as_str())
            .collect();
        Err(PipelineError::schema(
            partition,
            format!(
                "schema diverges from training partition (missing: {:?}, unexpected: {:?}, order differs: {})",
                missing,
                extra,
                missing.is_empty() && extra.is_empty(),
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![Column::numeric("tenure"), Column::categorical("contract")])
    }

    #[test]
    fn test_require_reports_absent_column() {
        let err = schema()
            .require(PartitionTag::Test, &[("monthly_charges", ColumnKind::Numeric)])
            .unwrap_err();
        assert!(err.to_string().contains("monthly_charges"));
        assert!(err.to_string().contains("test partition"));
    }

    #[test]
    fn test_require_reports_wrong_kind() {
        let err = schema()
            .require(PartitionTag::Train, &[("contract", ColumnKind::Numeric)])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }

    #[test]
    fn test_ensure_matches_detects_divergence() {
        let other = schema().with_column(Column::numeric("extra"));
        assert!(schema().ensure_matches(&schema(), PartitionTag::Test).is_ok());
        let err = schema().ensure_matches(&other, PartitionTag::Test).unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_value_fits_kind() {
        assert!(Value::Number(1.0).fits(ColumnKind::Numeric));
        assert!(!Value::category("x").fits(ColumnKind::Numeric));
        assert!(Value::Missing.fits(ColumnKind::Categorical));
    }
}
