// ============================================================
// Layer 4 — Cleaner / Transformer
// ============================================================
// Fits every data-dependent statistic on the TRAINING partition
// and applies the frozen result to any partition.
//
//   Transformer::fit(&Dataset<Train>) → StatisticSnapshot
//   snapshot.apply(&Dataset<P>)       → cleaned Dataset<P>   (Silver)
//   snapshot.vectorize(&Dataset<P>)   → FeatureMatrix<P>     (Gold input)
//
// What the snapshot holds, per column:
//
//   numeric      median          → fills missing cells
//                IQR fence       → Q1 - k·IQR .. Q3 + k·IQR clamp
//                log flag        → ln(1+x) for skewed columns
//                mean / std      → standard scaling
//   categorical  mode            → fills missing cells
//                vocabulary      → one-hot columns
//
// Order inside fit mirrors order inside apply: fill → cap → log,
// and the scaler is fitted on the already transformed training
// values, so train and test go through identical arithmetic.
//
// `fit` takes Dataset<Train> only. There is no way to hand it the
// test partition, so no snapshot value can depend on test data.
//
// Maps are BTreeMaps so the serialized snapshot is deterministic.
//
// Why fit on the training partition only?
//   A median, fence or vocabulary computed over all rows quietly
//   carries information about the test customers into the model.
//   The evaluation would then score rows the cleaner has already
//   seen, and the reported metrics would be optimistic.
//
// Why clamp outliers instead of dropping them?
//   Dropping rows changes the class balance the splitter worked
//   to preserve, and a scoring request cannot drop a customer.
//
// Reference: Rust Book §8 (Hash Maps), §10 (Generic Types)
//            scikit-learn RobustScaler / StandardScaler docs

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::domain::dataset::{Dataset, Partition, PartitionTag, Row, Train};
use crate::domain::error::{PipelineError, PipelineResult};
use crate::domain::feature_matrix::FeatureMatrix;
use crate::domain::schema::{ColumnKind, Schema, Value};

/// What to do with a categorical value never seen in training.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenCategoryPolicy {
    /// Route it to a dedicated `<column>=__unknown__` indicator.
    #[default]
    Unknown,
    /// Reject the partition with a SchemaError.
    Fail,
}

impl FromStr for UnseenCategoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "fail"    => Ok(Self::Fail),
            other     => Err(format!("unknown policy '{other}', expected 'unknown' or 'fail'")),
        }
    }
}

impl fmt::Display for UnseenCategoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Fail    => "fail",
        })
    }
}

pub const UNKNOWN_BUCKET: &str = "__unknown__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// k in the Q1 - k·IQR .. Q3 + k·IQR clamp
    pub iqr_multiplier: f64,
    /// Columns whose training skewness exceeds this get ln(1+x)
    pub skew_threshold: f64,
    /// What to do with a category the training partition never had
    pub unseen_policy:  UnseenCategoryPolicy,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            iqr_multiplier: 1.5,
            skew_threshold: 0.75,
            unseen_policy:  UnseenCategoryPolicy::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fence {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub median:        f64,
    /// None when the training IQR is zero (nothing sensible to clamp to).
    pub fence:         Option<Fence>,
    pub log_transform: bool,
    pub mean:          f64,
    pub std:           f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalStats {
    pub mode:       String,
    pub vocabulary: Vec<String>,
}

/// Every statistic derived from the training partition. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticSnapshot {
    fitted_on:     PartitionTag,
    fitted_rows:   usize,
    schema:        Schema,
    numeric:       BTreeMap<String, NumericStats>,
    categorical:   BTreeMap<String, CategoricalStats>,
    unseen_policy: UnseenCategoryPolicy,
}

pub struct Transformer {
    config: TransformConfig,
}

impl Transformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Compute the snapshot from training data only.
    pub fn fit(&self, train: &Dataset<Train>) -> PipelineResult<StatisticSnapshot> {
        let cfg = &self.config;
        if !(cfg.iqr_multiplier.is_finite() && cfg.iqr_multiplier >= 0.0) {
            return Err(PipelineError::Config(format!(
                "iqr_multiplier must be a non-negative number, got {}",
                cfg.iqr_multiplier
            )));
        }
        if !(cfg.skew_threshold.is_finite() && cfg.skew_threshold >= 0.0) {
            return Err(PipelineError::Config(format!(
                "skew_threshold must be a non-negative number, got {}",
                cfg.skew_threshold
            )));
        }
        if train.is_empty() {
            return Err(PipelineError::data_quality(
                PartitionTag::Train,
                "*",
                "training partition is empty, nothing to fit",
            ));
        }

        let schema = train.schema().clone();
        let mut numeric     = BTreeMap::new();
        let mut categorical = BTreeMap::new();

        for (idx, column) in schema.numeric_columns() {
            let stats = fit_numeric(train.rows(), idx, &column.name, cfg)?;
            tracing::debug!(
                "{}: median={:.3} fence={:?} log={} mean={:.3} std={:.3}",
                column.name, stats.median, stats.fence, stats.log_transform, stats.mean, stats.std
            );
            numeric.insert(column.name.clone(), stats);
        }

        for (idx, column) in schema.categorical_columns() {
            let stats = fit_categorical(train.rows(), idx, &column.name)?;
            tracing::debug!(
                "{}: mode='{}' vocabulary={:?}",
                column.name, stats.mode, stats.vocabulary
            );
            categorical.insert(column.name.clone(), stats);
        }

        Ok(StatisticSnapshot {
            fitted_on:     PartitionTag::Train,
            fitted_rows:   train.len(),
            schema,
            numeric,
            categorical,
            unseen_policy: cfg.unseen_policy,
        })
    }
}

fn fit_numeric(
    rows:   &[Row],
    idx:    usize,
    column: &str,
    cfg:    &TransformConfig,
) -> PipelineResult<NumericStats> {
    let observed: Vec<f64> = rows.iter().filter_map(|r| r.values[idx].as_number()).collect();
    if let Some(bad) = observed.iter().find(|x| !x.is_finite()) {
        return Err(PipelineError::data_quality(
            PartitionTag::Train,
            column,
            format!("non-finite value {bad}"),
        ));
    }
    if observed.is_empty() {
        return Err(PipelineError::data_quality(
            PartitionTag::Train,
            column,
            "no observed values to compute a median from",
        ));
    }

    let median = quantile(&observed, 0.5);
    let filled: Vec<f64> = rows
        .iter()
        .map(|r| r.values[idx].as_number().unwrap_or(median))
        .collect();

    let q1  = quantile(&filled, 0.25);
    let q3  = quantile(&filled, 0.75);
    let iqr = q3 - q1;
    let fence = (iqr > 0.0).then(|| Fence {
        lower: q1 - cfg.iqr_multiplier * iqr,
        upper: q3 + cfg.iqr_multiplier * iqr,
    });

    let capped: Vec<f64> = filled.iter().map(|&x| clamp(x, fence)).collect();
    let min = capped.iter().copied().fold(f64::INFINITY, f64::min);
    let log_transform = min >= 0.0 && skewness(&capped).abs() > cfg.skew_threshold;

    let transformed: Vec<f64> = capped
        .iter()
        .map(|&x| if log_transform { x.ln_1p() } else { x })
        .collect();
    let (mean, std) = mean_std(&transformed);

    Ok(NumericStats {
        median,
        fence,
        log_transform,
        mean,
        std: if std > 0.0 { std } else { 1.0 },
    })
}

fn fit_categorical(rows: &[Row], idx: usize, column: &str) -> PipelineResult<CategoricalStats> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in rows {
        if let Some(c) = r.values[idx].as_category() {
            *counts.entry(c).or_insert(0) += 1;
        }
    }

    // BTreeMap iterates in ascending order and only a strictly larger
    // count replaces the current mode, so ties go to the smallest value.
    let mut mode: Option<(&str, usize)> = None;
    for (&value, &count) in &counts {
        if mode.map_or(true, |(_, best)| count > best) {
            mode = Some((value, count));
        }
    }
    let (mode, _) = mode.ok_or_else(|| {
        PipelineError::data_quality(PartitionTag::Train, column, "no observed values to compute a mode from")
    })?;

    Ok(CategoricalStats {
        mode:       mode.to_string(),
        vocabulary: counts.keys().map(|s| s.to_string()).collect(),
    })
}

#[cfg(test)]
impl StatisticSnapshot {
    fn fitted_on(&self) -> PartitionTag {
        self.fitted_on
    }

    fn numeric(&self, column: &str) -> Option<&NumericStats> {
        self.numeric.get(column)
    }

    fn categorical(&self, column: &str) -> Option<&CategoricalStats> {
        self.categorical.get(column)
    }
}

impl StatisticSnapshot {
    pub fn fitted_rows(&self) -> usize {
        self.fitted_rows
    }

    /// A snapshot may only come from the training partition. Snapshots read
    /// back from disk are checked here before use.
    pub fn ensure_train_provenance(&self) -> PipelineResult<()> {
        if self.fitted_on == PartitionTag::Train {
            Ok(())
        } else {
            Err(PipelineError::leakage(
                self.fitted_on,
                "statistic snapshot was not fitted on the training partition",
            ))
        }
    }

    /// Fill, cap and log-transform. Output keeps the input schema.
    pub fn apply<P: Partition>(&self, dataset: &Dataset<P>) -> PipelineResult<Dataset<P>> {
        self.schema.ensure_matches(dataset.schema(), P::TAG)?;

        let columns = self.schema.columns();
        let rows = dataset
            .rows()
            .iter()
            .map(|row| {
                let values = row
                    .values
                    .iter()
                    .zip(columns)
                    .map(|(value, column)| match column.kind {
                        ColumnKind::Numeric => {
                            let stats = &self.numeric[&column.name];
                            let x = value.as_number().unwrap_or(stats.median);
                            let x = clamp(x, stats.fence);
                            let x = if stats.log_transform { x.ln_1p() } else { x };
                            if x.is_finite() {
                                Ok(Value::Number(x))
                            } else {
                                Err(PipelineError::data_quality(
                                    P::TAG,
                                    &column.name,
                                    format!("row '{}' became {x} after cleaning", row.id),
                                ))
                            }
                        }
                        ColumnKind::Categorical => {
                            let stats = &self.categorical[&column.name];
                            Ok(match value {
                                Value::Missing => Value::Category(stats.mode.clone()),
                                other          => other.clone(),
                            })
                        }
                    })
                    .collect::<PipelineResult<Vec<Value>>>()?;
                Ok(Row { id: row.id.clone(), values, churn: row.churn })
            })
            .collect::<PipelineResult<Vec<Row>>>()?;

        Dataset::checked(self.schema.clone(), rows)
    }

    /// Names of the vectorized features, in output order.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for column in self.schema.columns() {
            match column.kind {
                ColumnKind::Numeric => names.push(column.name.clone()),
                ColumnKind::Categorical => {
                    let stats = &self.categorical[&column.name];
                    names.extend(stats.vocabulary.iter().map(|v| format!("{}={}", column.name, v)));
                    if self.unseen_policy == UnseenCategoryPolicy::Unknown {
                        names.push(format!("{}={}", column.name, UNKNOWN_BUCKET));
                    }
                }
            }
        }
        names
    }

    /// Scale numeric columns and one-hot encode categorical ones.
    /// Expects a dataset already passed through `apply`.
    pub fn vectorize<P: Partition>(&self, dataset: &Dataset<P>) -> PipelineResult<FeatureMatrix<P>> {
        self.schema.ensure_matches(dataset.schema(), P::TAG)?;

        let columns  = self.schema.columns();
        let names    = self.feature_names();
        let mut rows = Vec::with_capacity(dataset.len());

        for row in dataset.rows() {
            let mut out = Vec::with_capacity(names.len());
            for (value, column) in row.values.iter().zip(columns) {
                match (column.kind, value) {
                    (ColumnKind::Numeric, Value::Number(x)) => {
                        let stats = &self.numeric[&column.name];
                        let z = (x - stats.mean) / stats.std;
                        if !z.is_finite() {
                            return Err(PipelineError::data_quality(
                                P::TAG,
                                &column.name,
                                format!("row '{}' became {z} after scaling", row.id),
                            ));
                        }
                        out.push(z);
                    }
                    (ColumnKind::Categorical, Value::Category(c)) => {
                        let stats = &self.categorical[&column.name];
                        let hit   = stats.vocabulary.binary_search(c).ok();
                        if hit.is_none() && self.unseen_policy == UnseenCategoryPolicy::Fail {
                            return Err(PipelineError::schema(
                                P::TAG,
                                format!(
                                    "column '{}' row '{}' holds category '{}' unseen in training",
                                    column.name, row.id, c
                                ),
                            ));
                        }
                        out.extend((0..stats.vocabulary.len()).map(|i| {
                            if hit == Some(i) { 1.0 } else { 0.0 }
                        }));
                        if self.unseen_policy == UnseenCategoryPolicy::Unknown {
                            out.push(if hit.is_none() { 1.0 } else { 0.0 });
                        }
                    }
                    (_, other) => {
                        return Err(PipelineError::data_quality(
                            P::TAG,
                            &column.name,
                            format!("row '{}' holds {:?}; clean the dataset before vectorizing", row.id, other),
                        ));
                    }
                }
            }
            rows.push(out);
        }

        FeatureMatrix::new(
            names,
            dataset.ids().map(str::to_string).collect(),
            rows,
            dataset.rows().iter().map(|r| r.churn).collect(),
        )
    }
}

// ─── Statistics helpers ──────────────────────────────────────────────────────

fn clamp(x: f64, fence: Option<Fence>) -> f64 {
    match fence {
        Some(f) => x.clamp(f.lower, f.upper),
        None    => x,
    }
}

/// Quantile by linear interpolation between closest ranks.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos  = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo   = pos.floor() as usize;
    let hi   = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Population mean and standard deviation.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let n    = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var  = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Fisher-Pearson skewness; 0 for fewer than 3 values or zero variance.
fn skewness(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let n    = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let m2   = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let m3   = values.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / n;
    if m2 <= 0.0 { 0.0 } else { m3 / m2.powf(1.5) }
}
