// ============================================================
// Layer 4 — Stratified Train/Test Splitter
// ============================================================
// Splits the raw labeled dataset into a Train and a Test
// partition, once, before any statistic is computed.
//
// Why stratify?
//   Churners are the minority class (~20-30%). A plain shuffle
//   can leave the test set with noticeably fewer churners than
//   the population, which distorts recall and precision.
//   Splitting each class separately keeps both partitions at the
//   source churn rate.
//
// How:
//   1. Group row indices by label
//   2. Shuffle each group with a seeded ChaCha8Rng (Fisher-Yates)
//   3. The first round(len * train_fraction) of each group → train
//   4. Restore source order inside each partition
//
// Guarantees: train ∪ test == input, train ∩ test == ∅.
//
// This is the ONLY place Dataset<Train> / Dataset<Test> values
// are created from raw data.
//
// Reference: rand crate documentation (SliceRandom)

use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;

use crate::domain::dataset::{Dataset, PartitionTag, Row, Test, Train, Unpartitioned};
use crate::domain::error::{PipelineError, PipelineResult};

/// The two partitions produced by one split.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Dataset<Train>,
    pub test:  Dataset<Test>,
}

/// Stratified split of `dataset` into (train, test).
///
/// # Arguments
/// * `dataset`        - Raw labeled data (consumed)
/// * `train_fraction` - Share of each class sent to training, e.g. 0.8
/// * `seed`           - Shuffle seed; same seed → same split
pub fn stratified_split(
    dataset:        Dataset<Unpartitioned>,
    train_fraction: f64,
    seed:           u64,
) -> PipelineResult<Split> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(PipelineError::Config(format!(
            "train_fraction must be in (0, 1), got {train_fraction}"
        )));
    }

    let schema = dataset.schema().clone();
    let total  = dataset.len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let (mut churners, mut stayers): (Vec<usize>, Vec<usize>) =
        (0..total).partition(|&i| dataset.rows()[i].churn);

    let mut train_idx = Vec::with_capacity(total);
    let mut test_idx  = Vec::with_capacity(total);

    // Fixed class order keeps the RNG stream reproducible.
    for group in [&mut stayers, &mut churners] {
        group.shuffle(&mut rng);
        let cut = ((group.len() as f64) * train_fraction).round() as usize;
        let cut = cut.min(group.len());
        train_idx.extend_from_slice(&group[..cut]);
        test_idx.extend_from_slice(&group[cut..]);
    }

    train_idx.sort_unstable();
    test_idx.sort_unstable();

    let mut slots: Vec<Option<Row>> = dataset.into_rows().into_iter().map(Some).collect();
    let mut take = |idx: &[usize]| -> Vec<Row> {
        idx.iter().filter_map(|&i| slots[i].take()).collect()
    };
    let train_rows = take(&train_idx);
    let test_rows  = take(&test_idx);

    let split = Split {
        train: Dataset::<Train>::checked(schema.clone(), train_rows)?,
        test:  Dataset::<Test>::checked(schema, test_rows)?,
    };
    ensure_disjoint(&split)?;

    tracing::debug!(
        "Stratified split: {} train ({:.1}% churn), {} test ({:.1}% churn)",
        split.train.len(),
        split.train.churn_rate() * 100.0,
        split.test.len(),
        split.test.churn_rate() * 100.0,
    );

    Ok(split)
}

/// No customer id may appear in both partitions.
pub fn ensure_disjoint(split: &Split) -> PipelineResult<()> {
    let train_ids: HashSet<&str> = split.train.ids().collect();
    if let Some(shared) = split.test.ids().find(|id| train_ids.contains(id)) {
        return Err(PipelineError::leakage(
            PartitionTag::Test,
            format!("customer '{shared}' appears in both train and test"),
        ));
    }
    Ok(())
}
