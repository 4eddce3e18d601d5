//! Bagged decision trees for direction classification.
//!
//! Small CART trees over the factor vector, trained on bootstrap samples
//! with a random feature subset per split. Training is deterministic for a
//! given seed, which keeps backtests reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Forest hyperparameters.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 50,
            max_depth: 8,
            min_samples_split: 5,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        prob_up: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn prob_up(&self, features: &[f64]) -> f64 {
        match self {
            Node::Leaf { prob_up } => *prob_up,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                let value = features.get(*feature).copied().unwrap_or(0.0);
                if value <= *threshold {
                    left.prob_up(features)
                } else {
                    right.prob_up(features)
                }
            }
        }
    }
}

/// A trained forest.
#[derive(Debug, Clone)]
pub struct Forest {
    trees: Vec<Node>,
}

impl Forest {
    /// Train on feature rows `x` and up/down labels `y`.
    pub fn train(x: &[Vec<f64>], y: &[bool], config: &ForestConfig) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!(
                "bad training set: {} rows, {} labels",
                x.len(),
                y.len()
            ));
        }
        let n_features = x[0].len();
        if n_features == 0 {
            return Err("empty feature vectors".to_string());
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let features_per_split = (n_features as f64).sqrt().ceil() as usize;

        let mut trees = Vec::with_capacity(config.n_trees);
        for _ in 0..config.n_trees {
            // Bootstrap sample with replacement.
            let indices: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
            let tree = build_node(
                x,
                y,
                &indices,
                config.max_depth,
                config.min_samples_split,
                features_per_split,
                n_features,
                &mut rng,
            );
            trees.push(tree);
        }
        Ok(Self { trees })
    }

    /// Fraction of trees voting "up", smoothed by leaf probabilities.
    pub fn prob_up(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        let sum: f64 = self.trees.iter().map(|t| t.prob_up(features)).sum();
        sum / self.trees.len() as f64
    }
}

fn label_fraction(y: &[bool], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.5;
    }
    let ups = indices.iter().filter(|&&i| y[i]).count();
    ups as f64 / indices.len() as f64
}

fn gini(p: f64) -> f64 {
    2.0 * p * (1.0 - p)
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    x: &[Vec<f64>],
    y: &[bool],
    indices: &[usize],
    depth_left: usize,
    min_samples_split: usize,
    features_per_split: usize,
    n_features: usize,
    rng: &mut StdRng,
) -> Node {
    let p = label_fraction(y, indices);
    if depth_left == 0
        || indices.len() < min_samples_split
        || p == 0.0
        || p == 1.0
    {
        return Node::Leaf { prob_up: p };
    }

    let parent_impurity = gini(p);
    let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, gain)

    for _ in 0..features_per_split {
        let feature = rng.gen_range(0..n_features);
        let mut values: Vec<f64> = indices.iter().map(|&i| x[i][feature]).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        values.dedup();
        if values.len() < 2 {
            continue;
        }

        // Candidate thresholds: midpoints, capped to keep splits cheap.
        let step = (values.len() / 8).max(1);
        for pair in values.windows(2).step_by(step) {
            let threshold = (pair[0] + pair[1]) / 2.0;
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .copied()
                .partition(|&i| x[i][feature] <= threshold);
            if left.is_empty() || right.is_empty() {
                continue;
            }
            let weight_l = left.len() as f64 / indices.len() as f64;
            let impurity = weight_l * gini(label_fraction(y, &left))
                + (1.0 - weight_l) * gini(label_fraction(y, &right));
            let gain = parent_impurity - impurity;
            if best.map(|(_, _, g)| gain > g).unwrap_or(gain > 1e-9) {
                best = Some((feature, threshold, gain));
            }
        }
    }

    let Some((feature, threshold, _)) = best else {
        return Node::Leaf { prob_up: p };
    };

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| x[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(
            x,
            y,
            &left_idx,
            depth_left - 1,
            min_samples_split,
            features_per_split,
            n_features,
            rng,
        )),
        right: Box::new(build_node(
            x,
            y,
            &right_idx,
            depth_left - 1,
            min_samples_split,
            features_per_split,
            n_features,
            rng,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A separable toy set: label is "first feature above 0.5".
    fn toy_set(n: usize) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let v = i as f64 / n as f64;
            x.push(vec![v, 1.0 - v, (i % 3) as f64]);
            y.push(v > 0.5);
        }
        (x, y)
    }

    #[test]
    fn learns_a_separable_rule() {
        let (x, y) = toy_set(200);
        let forest = Forest::train(&x, &y, &ForestConfig::default()).unwrap();

        assert!(forest.prob_up(&[0.9, 0.1, 0.0]) > 0.7);
        assert!(forest.prob_up(&[0.1, 0.9, 0.0]) < 0.3);
    }

    #[test]
    fn training_is_deterministic_per_seed() {
        let (x, y) = toy_set(120);
        let config = ForestConfig {
            seed: 7,
            ..ForestConfig::default()
        };
        let a = Forest::train(&x, &y, &config).unwrap();
        let b = Forest::train(&x, &y, &config).unwrap();

        let probe = [0.42, 0.58, 1.0];
        assert_eq!(a.prob_up(&probe), b.prob_up(&probe));
    }

    #[test]
    fn rejects_degenerate_input() {
        assert!(Forest::train(&[], &[], &ForestConfig::default()).is_err());
        assert!(Forest::train(&[vec![1.0]], &[true, false], &ForestConfig::default()).is_err());
    }

    #[test]
    fn single_class_predicts_that_class() {
        let x: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64]).collect();
        let y = vec![true; 30];
        let forest = Forest::train(&x, &y, &ForestConfig::default()).unwrap();
        assert_eq!(forest.prob_up(&[15.0]), 1.0);
    }
}
