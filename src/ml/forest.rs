// ============================================================
// Layer 5 — Random Forest (feature importance)
// ============================================================
// A small classification forest used for one job: ranking the
// features of the balanced training matrix by Gini importance.
//
//   - each tree sees a bootstrap sample of the rows
//   - each node considers `max_features` random features
//   - the best threshold per feature is found by sorting the
//     node's rows once and sweeping left → right while keeping
//     running class counts (O(n log n) per feature)
//   - importance of a feature = total weighted impurity decrease
//     of the splits on it, normalized per tree, averaged, and
//     normalized again so the forest's importances sum to 1
//
// Trees are grown in parallel with rayon. Tree i owns its own
// ChaCha8Rng seeded with seed + i, so the result does not depend
// on thread scheduling.
//
// Why a forest just for importances?
//   Importances from a single tree swing with every bootstrap
//   sample. Averaging over many decorrelated trees gives a stable
//   ranking, and the selector only needs that ranking.
//
// Reference: Breiman (2001), Random Forests
//            rayon crate documentation

use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::dataset::{PartitionTag, Train};
use crate::domain::error::{PipelineError, PipelineResult};
use crate::domain::feature_matrix::FeatureMatrix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the forest
    pub n_trees:           usize,
    /// Maximum depth of each tree
    pub max_depth:         usize,
    /// Minimum rows a node needs before it may split
    pub min_samples_split: usize,
    /// Minimum rows on each side of a split
    pub min_samples_leaf:  usize,
    /// Features tried per node; sqrt(n_features) when None
    pub max_features:      Option<usize>,
    pub seed:              u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees:           100,
            max_depth:         8,
            min_samples_split: 4,
            min_samples_leaf:  2,
            max_features:      None,
            seed:              42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        p_churn: f64,
    },
    Split {
        feature:   usize,
        threshold: f64,
        left:      usize,
        right:     usize,
    },
}

/// One CART classification tree stored as a flat node arena (root = 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes:       Vec<Node>,
    importances: Vec<f64>,
}

struct SplitCandidate {
    feature:   usize,
    threshold: f64,
    gain:      f64,
}

/// Gini impurity of a node with `pos` churners out of `n` rows.
fn gini(pos: usize, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = pos as f64 / n as f64;
    2.0 * p * (1.0 - p)
}

struct TreeBuilder<'a> {
    rows:         &'a [Vec<f64>],
    labels:       &'a [bool],
    config:       &'a ForestConfig,
    max_features: usize,
    rng:          ChaCha8Rng,
    nodes:        Vec<Node>,
    importances:  Vec<f64>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, idx: Vec<usize>, depth: usize) -> usize {
        let n   = idx.len();
        let pos = idx.iter().filter(|&&i| self.labels[i]).count();

        let node_id = self.nodes.len();
        self.nodes.push(Node::Leaf { p_churn: pos as f64 / n.max(1) as f64 });

        if depth >= self.config.max_depth
            || n < self.config.min_samples_split
            || pos == 0
            || pos == n
        {
            return node_id;
        }

        let Some(best) = self.best_split(&idx, pos) else {
            return node_id;
        };

        let rows = self.rows;
        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = idx
            .into_iter()
            .partition(|&i| rows[i][best.feature] <= best.threshold);
        if left_idx.is_empty() || right_idx.is_empty() {
            return node_id;
        }

        self.importances[best.feature] += best.gain;
        let left  = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[node_id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_id
    }

    fn best_split(&mut self, idx: &[usize], pos: usize) -> Option<SplitCandidate> {
        let rows     = self.rows;
        let labels   = self.labels;
        let min_leaf = self.config.min_samples_leaf.max(1);
        let n        = idx.len();
        let parent   = gini(pos, n);

        let mut features: Vec<usize> = (0..self.importances.len()).collect();
        let (chosen, _) = features.partial_shuffle(&mut self.rng, self.max_features);
        let chosen = chosen.to_vec();

        let mut order = idx.to_vec();
        let mut best: Option<SplitCandidate> = None;

        for f in chosen {
            order.sort_by(|&a, &b| rows[a][f].total_cmp(&rows[b][f]));

            let mut left_pos = 0usize;
            for k in 0..n - 1 {
                if labels[order[k]] {
                    left_pos += 1;
                }
                let n_left  = k + 1;
                let n_right = n - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                let here = rows[order[k]][f];
                let next = rows[order[k + 1]][f];
                if here == next {
                    continue;
                }

                let gain = n as f64 * parent
                    - n_left as f64 * gini(left_pos, n_left)
                    - n_right as f64 * gini(pos - left_pos, n_right);
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature:   f,
                        threshold: here + (next - here) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

impl DecisionTree {
    fn fit(
        rows:         &[Vec<f64>],
        labels:       &[bool],
        sample:       Vec<usize>,
        config:       &ForestConfig,
        max_features: usize,
        rng:          ChaCha8Rng,
    ) -> Self {
        let n_features = rows.first().map_or(0, Vec::len);
        let mut builder = TreeBuilder {
            rows,
            labels,
            config,
            max_features,
            rng,
            nodes:       Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.grow(sample, 0);

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }
        Self { nodes: builder.nodes, importances }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    feature_names: Vec<String>,
    trees:         Vec<DecisionTree>,
    importances:   Vec<f64>,
}

impl RandomForest {
    /// Grow the forest on the (balanced) training matrix.
    pub fn fit(config: ForestConfig, train: &FeatureMatrix<Train>) -> PipelineResult<Self> {
        if config.n_trees == 0 || config.max_depth == 0 {
            return Err(PipelineError::Config(
                "forest needs at least one tree and a depth of at least 1".into(),
            ));
        }
        if train.n_rows() == 0 || train.n_features() == 0 {
            return Err(PipelineError::data_quality(
                PartitionTag::Train,
                "*",
                "cannot grow a forest on an empty feature matrix",
            ));
        }

        let n_rows       = train.n_rows();
        let n_features   = train.n_features();
        let max_features = config
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features);

        let rows   = train.rows();
        let labels = train.labels();
        let trees: Vec<DecisionTree> = (0..config.n_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let sample: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                DecisionTree::fit(rows, labels, sample, &config, max_features, rng)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        for tree in &trees {
            for (acc, v) in importances.iter_mut().zip(tree.feature_importances()) {
                *acc += v;
            }
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        tracing::debug!(
            "Random forest: {} trees, {} nodes on average, max_features={}",
            trees.len(),
            trees.iter().map(DecisionTree::n_nodes).sum::<usize>() / trees.len(),
            max_features,
        );

        Ok(Self {
            feature_names: train.names().to_vec(),
            trees,
            importances,
        })
    }

    /// Normalized importances (sum to 1, or all 0 when no tree could split).
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// (feature name, importance) pairs, most important first.
    pub fn ranked_importances(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .feature_names
            .iter()
            .cloned()
            .zip(self.importances.iter().copied())
            .collect();
        // Stable sort: equal importances keep matrix order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

// Scoring is only needed to check what the trees learned; the
// pipeline reads importances and nothing else.
#[cfg(test)]
impl DecisionTree {
    fn predict_proba(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { p_churn } => return *p_churn,
                Node::Split { feature, threshold, left, right } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[cfg(test)]
impl RandomForest {
    /// Mean churn probability over all trees.
    fn predict_proba(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict_proba(row)).sum::<f64>() / self.trees.len() as f64
    }
}
