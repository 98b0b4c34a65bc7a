//! Bagged regression trees with a squared-error split criterion.

use ndarray::{ArrayView1, ArrayView2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{check_output, check_shape, FitError, ModelError, WaitModel};
use crate::RANDOM_SEED;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self { n_trees: 100, max_depth: 10, min_samples_split: 2, seed: RANDOM_SEED }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Flat node arena, root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
}

impl ForestModel {
    pub fn n_trees(&self) -> usize { self.trees.len() }

    /// Fit `params.n_trees` trees in parallel. Each tree gets its own seed
    /// drawn up front from the master seed, so the result does not depend on
    /// how rayon schedules the work.
    pub fn fit<'a>(x: ArrayView2<'a, f64>, y: ArrayView1<'a, f64>, params: &'a ForestParams) -> Result<Self, FitError> {
        if x.nrows() != y.len() {
            return Err(FitError::LengthMismatch { rows: x.nrows(), targets: y.len() });
        }
        if x.nrows() == 0 || params.n_trees == 0 {
            return Err(FitError::Empty);
        }
        let mut master = ChaCha8Rng::seed_from_u64(params.seed);
        let seeds: Vec<u64> = (0..params.n_trees).map(|_| master.gen()).collect();
        let trees = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let n = x.nrows();
                let mut sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut builder = TreeBuilder { x, y, params, nodes: Vec::new() };
                builder.grow(&mut sample, 0);
                RegressionTree { nodes: builder.nodes }
            })
            .collect();
        Ok(Self { trees })
    }
}

impl WaitModel for ForestModel {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        check_shape(features)?;
        if self.trees.is_empty() {
            return Err(ModelError::MalformedTree("forest has no trees".into()));
        }
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.predict(features)?;
        }
        check_output(sum / self.trees.len() as f64)
    }
}

impl RegressionTree {
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        let mut at = 0;
        // a well-formed tree reaches a leaf in fewer steps than it has nodes
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(at) {
                Some(Node::Leaf { value }) => return Ok(*value),
                Some(Node::Split { feature, threshold, left, right }) => {
                    let v = features
                        .get(*feature)
                        .ok_or_else(|| ModelError::MalformedTree(format!("feature index {feature}")))?;
                    at = if *v <= *threshold { *left } else { *right };
                }
                None => return Err(ModelError::MalformedTree(format!("node index {at}"))),
            }
        }
        Err(ModelError::MalformedTree("cycle".into()))
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    left_len: usize,
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn grow(&mut self, sample: &mut [usize], depth: usize) -> usize {
        let id = self.nodes.len();
        let (sum, sum_sq) = moments(self.y, sample);
        let n = sample.len() as f64;
        self.nodes.push(Node::Leaf { value: sum / n });

        let impurity = sum_sq - sum * sum / n;
        if depth >= self.params.max_depth || sample.len() < self.params.min_samples_split || impurity <= 0.0 {
            return id;
        }
        let Some(split) = self.best_split(sample) else {
            return id;
        };

        self.sort_by_feature(sample, split.feature);
        let (lo, hi) = sample.split_at_mut(split.left_len);
        let left = self.grow(lo, depth + 1);
        let right = self.grow(hi, depth + 1);
        self.nodes[id] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        id
    }

    fn sort_by_feature(&self, sample: &mut [usize], feature: usize) {
        let x = self.x;
        sample.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));
    }

    /// Lowest summed child SSE over all features and all cut points between
    /// distinct adjacent values. Ties keep the first candidate found.
    fn best_split(&self, sample: &mut [usize]) -> Option<BestSplit> {
        let (total, total_sq) = moments(self.y, sample);
        let n = sample.len();
        let mut best: Option<(f64, BestSplit)> = None;

        for feature in 0..self.x.ncols() {
            self.sort_by_feature(sample, feature);
            let (mut lsum, mut lsq) = (0.0, 0.0);
            for i in 1..n {
                let yi = self.y[sample[i - 1]];
                lsum += yi;
                lsq += yi * yi;
                let (a, b) = (self.x[[sample[i - 1], feature]], self.x[[sample[i], feature]]);
                if a == b {
                    continue;
                }
                let (nl, nr) = (i as f64, (n - i) as f64);
                let (rsum, rsq) = (total - lsum, total_sq - lsq);
                let score = (lsq - lsum * lsum / nl) + (rsq - rsum * rsum / nr);
                if best.as_ref().map_or(true, |(s, _)| score < *s) {
                    best = Some((score, BestSplit { feature, threshold: a + (b - a) / 2.0, left_len: i }));
                }
            }
        }
        best.map(|(_, split)| split)
    }
}

fn moments(y: ArrayView1<f64>, sample: &[usize]) -> (f64, f64) {
    sample.iter().fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let rows: Vec<[f64; 3]> = (0..40).map(|i| [f64::from(i % 20 + 1), 60.0 + f64::from(i), 2.0]).collect();
        let x = Array2::from_shape_vec((rows.len(), 3), rows.iter().flatten().copied().collect()).unwrap();
        let y = rows.iter().map(|r| if r[0] <= 10.0 { 100.0 } else { 900.0 }).collect();
        (x, y)
    }

    #[test]
    fn learns_a_step_function() {
        let (x, y) = step_data();
        let params = ForestParams { n_trees: 25, ..Default::default() };
        let forest = ForestModel::fit(x.view(), y.view(), &params).unwrap();
        assert_eq!(forest.n_trees(), 25);
        let low = forest.predict(&[3.0, 70.0, 2.0]).unwrap();
        let high = forest.predict(&[18.0, 70.0, 2.0]).unwrap();
        assert!(low < 300.0, "low side predicted {low}");
        assert!(high > 700.0, "high side predicted {high}");
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = step_data();
        let params = ForestParams { n_trees: 10, ..Default::default() };
        let a = ForestModel::fit(x.view(), y.view(), &params).unwrap();
        let b = ForestModel::fit(x.view(), y.view(), &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn depth_limit_zero_gives_bootstrap_means() {
        let (x, y) = step_data();
        let params = ForestParams { n_trees: 3, max_depth: 0, ..Default::default() };
        let forest = ForestModel::fit(x.view(), y.view(), &params).unwrap();
        for tree in &forest.trees {
            assert_eq!(tree.nodes.len(), 1);
        }
    }

    #[test]
    fn dangling_child_is_an_error() {
        let tree = RegressionTree {
            nodes: vec![Node::Split { feature: 0, threshold: 1.0, left: 5, right: 6 }],
        };
        let forest = ForestModel { trees: vec![tree] };
        assert!(matches!(forest.predict(&[0.0, 0.0, 0.0]), Err(ModelError::MalformedTree(_))));
    }

    #[test]
    fn cyclic_tree_terminates() {
        let tree = RegressionTree {
            nodes: vec![Node::Split { feature: 0, threshold: 1.0, left: 0, right: 0 }],
        };
        let forest = ForestModel { trees: vec![tree] };
        assert!(matches!(forest.predict(&[0.0, 0.0, 0.0]), Err(ModelError::MalformedTree(_))));
    }
}
