//! Bagged regression forest over fixed-width numeric vectors.
//!
//! Each tree predicts the full output vector (mean-vector leaves, splits
//! chosen to minimize summed per-output squared error); the forest
//! averages its trees. Bootstrap sampling is seeded, so a given config and
//! dataset always produce the same model.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug)]
pub struct ForestConfig {
    pub trees: usize,
    pub max_depth: usize,
    pub min_leaf: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 24,
            max_depth: 6,
            min_leaf: 2,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict<'a>(&'a self, features: &[f64]) -> &'a [f64] {
        match self {
            Node::Leaf { value } => value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let x = features.get(*feature).copied().unwrap_or(0.0);
                if x <= *threshold {
                    left.predict(features)
                } else {
                    right.predict(features)
                }
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForestRegressor {
    feature_len: usize,
    output_len: usize,
    trees: Vec<Node>,
}

impl ForestRegressor {
    /// Fits a forest on `features[i] -> targets[i]`. All rows must share
    /// the widths of the first row; the supervised-set builder guarantees
    /// that upstream.
    pub fn fit(config: ForestConfig, features: &[Vec<f64>], targets: &[Vec<f64>]) -> Self {
        assert!(!features.is_empty(), "forest fit on empty sample set");
        assert_eq!(features.len(), targets.len());

        let feature_len = features[0].len();
        let output_len = targets[0].len();
        let n = features.len();

        let mut trees = Vec::with_capacity(config.trees);
        for t in 0..config.trees {
            let mut rng = SmallRng::seed_from_u64(config.seed.wrapping_add(t as u64));
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            trees.push(build_node(
                features,
                targets,
                &sample,
                config.max_depth,
                config.min_leaf,
                &mut rng,
            ));
        }

        Self {
            feature_len,
            output_len,
            trees,
        }
    }

    /// Average prediction over all trees. Inputs shorter than
    /// `feature_len` read as zero in the missing positions.
    pub fn predict(&self, features: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.output_len];
        for tree in &self.trees {
            for (acc, v) in out.iter_mut().zip(tree.predict(features)) {
                *acc += v;
            }
        }
        let scale = 1.0 / self.trees.len() as f64;
        for v in &mut out {
            *v *= scale;
        }
        out
    }

    pub fn feature_len(&self) -> usize {
        self.feature_len
    }

    pub fn output_len(&self) -> usize {
        self.output_len
    }
}

fn mean_vector(targets: &[Vec<f64>], sample: &[usize]) -> Vec<f64> {
    let width = targets[sample[0]].len();
    let mut mean = vec![0.0; width];
    for &i in sample {
        for (m, v) in mean.iter_mut().zip(&targets[i]) {
            *m += v;
        }
    }
    let scale = 1.0 / sample.len() as f64;
    for m in &mut mean {
        *m *= scale;
    }
    mean
}

/// Sum over outputs of squared deviation from the sample mean.
fn sse(targets: &[Vec<f64>], sample: &[usize]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    let mean = mean_vector(targets, sample);
    let mut total = 0.0;
    for &i in sample {
        for (m, v) in mean.iter().zip(&targets[i]) {
            let d = v - m;
            total += d * d;
        }
    }
    total
}

fn build_node(
    features: &[Vec<f64>],
    targets: &[Vec<f64>],
    sample: &[usize],
    depth: usize,
    min_leaf: usize,
    rng: &mut SmallRng,
) -> Node {
    let parent_sse = sse(targets, sample);
    if depth == 0 || sample.len() < 2 * min_leaf || parent_sse == 0.0 {
        return Node::Leaf {
            value: mean_vector(targets, sample),
        };
    }

    let feature_len = features[sample[0]].len();
    // Random-subspace selection: consider roughly sqrt(d) features per split.
    let tries = ((feature_len as f64).sqrt().ceil() as usize).max(1);
    let mut candidates: Vec<usize> = (0..feature_len).collect();
    for i in 0..tries.min(candidates.len()) {
        let j = rng.gen_range(i..candidates.len());
        candidates.swap(i, j);
    }
    candidates.truncate(tries);

    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, score)
    for &feature in &candidates {
        let mut values: Vec<f64> = sample.iter().map(|&i| features[i][feature]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        for pair in values.windows(2) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (left, right): (Vec<usize>, Vec<usize>) = sample
                .iter()
                .partition(|&&i| features[i][feature] <= threshold);
            if left.len() < min_leaf || right.len() < min_leaf {
                continue;
            }
            let score = sse(targets, &left) + sse(targets, &right);
            if best.map_or(true, |(_, _, s)| score < s) {
                best = Some((feature, threshold, score));
            }
        }
    }

    match best {
        Some((feature, threshold, score)) if score < parent_sse => {
            let (left, right): (Vec<usize>, Vec<usize>) = sample
                .iter()
                .partition(|&&i| features[i][feature] <= threshold);
            Node::Split {
                feature,
                threshold,
                left: Box::new(build_node(features, targets, &left, depth - 1, min_leaf, rng)),
                right: Box::new(build_node(
                    features,
                    targets,
                    &right,
                    depth - 1,
                    min_leaf,
                    rng,
                )),
            }
        }
        _ => Node::Leaf {
            value: mean_vector(targets, sample),
        },
    }
}
