// ============================================================
// Layer 3 — Partition-Tagged Datasets
// ============================================================
// A Dataset is an ordered collection of rows sharing a Schema.
// Its partition lives in the TYPE, not in a field:
//
//   Dataset<Unpartitioned>  — generated / loaded raw data
//   Dataset<Train>          — produced only by the splitter
//   Dataset<Test>           — produced only by the splitter
//
// Statistic fitting, resampling and model training accept only
// the Train marker, so feeding test data into a fit is a compile
// error rather than a runtime check.
//
// Rows are never mutated after construction; each stage builds a
// new Dataset value from the previous one.
//
// Why a marker type instead of a field?
//   A `partition: PartitionTag` field is checked at runtime, in
//   every function, by whoever remembers to. A zero-sized marker
//   moves that check to the signature of `fit`.
//
// Reference: Rust Book §10 (Generic Types), §19 (PhantomData)

use serde::{Deserialize, Serialize};
use std::{fmt, marker::PhantomData};

use crate::domain::error::{PipelineError, PipelineResult};
use crate::domain::schema::{Schema, Value};

/// Runtime name of a partition, used in error messages and store keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionTag {
    Unpartitioned,
    Train,
    Test,
}

impl PartitionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionTag::Unpartitioned => "unpartitioned",
            PartitionTag::Train         => "train",
            PartitionTag::Test          => "test",
        }
    }
}

impl fmt::Display for PartitionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unpartitioned {}
    impl Sealed for super::Train {}
    impl Sealed for super::Test {}
}

/// Type-level partition marker. Sealed: no other partitions exist.
pub trait Partition:
    sealed::Sealed + Clone + Copy + fmt::Debug + PartialEq + Send + Sync + 'static
{
    const TAG: PartitionTag;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unpartitioned;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Train;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Test;

impl Partition for Unpartitioned { const TAG: PartitionTag = PartitionTag::Unpartitioned; }
impl Partition for Train         { const TAG: PartitionTag = PartitionTag::Train; }
impl Partition for Test          { const TAG: PartitionTag = PartitionTag::Test; }

/// One customer row: stable id, one value per schema column, churn label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id:     String,
    pub values: Vec<Value>,
    pub churn:  bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Dataset<P: Partition> {
    schema: Schema,
    rows:   Vec<Row>,
    #[serde(skip)]
    partition: PhantomData<P>,
}

impl Dataset<Unpartitioned> {
    /// Build a raw dataset, checking every row against the schema.
    pub fn new(schema: Schema, rows: Vec<Row>) -> PipelineResult<Self> {
        Self::checked(schema, rows)
    }
}

impl<P: Partition> Dataset<P> {
    /// Build a dataset for this partition, checking every row against the schema.
    /// Crate-private: only the splitter and row-wise transforms create
    /// Train/Test datasets.
    pub(crate) fn checked(schema: Schema, rows: Vec<Row>) -> PipelineResult<Self> {
        for row in &rows {
            if row.values.len() != schema.len() {
                return Err(PipelineError::schema(
                    P::TAG,
                    format!(
                        "row '{}' has {} values, schema has {} columns",
                        row.id,
                        row.values.len(),
                        schema.len()
                    ),
                ));
            }
            for (value, column) in row.values.iter().zip(schema.columns()) {
                if !value.fits(column.kind) {
                    return Err(PipelineError::schema(
                        P::TAG,
                        format!(
                            "row '{}' column '{}' holds {:?}, expected {:?}",
                            row.id, column.name, value, column.kind
                        ),
                    ));
                }
            }
        }
        Ok(Self { schema, rows, partition: PhantomData })
    }

    /// Relabel rows for test fixtures; production rows only change
    /// partition through the splitter's `checked` calls.
    #[cfg(test)]
    pub(crate) fn into_partition<Q: Partition>(self) -> Dataset<Q> {
        Dataset { schema: self.schema, rows: self.rows, partition: PhantomData }
    }

    pub fn partition(&self) -> PartitionTag {
        P::TAG
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn churn_count(&self) -> usize {
        self.rows.iter().filter(|r| r.churn).count()
    }

    /// Fraction of churners, 0.0 for an empty dataset.
    pub fn churn_rate(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.churn_count() as f64 / self.rows.len() as f64
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.id.as_str())
    }
}
