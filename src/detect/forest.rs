//! Isolation forest over telemetry feature vectors.
//!
//! Each tree recursively partitions a random subsample with axis-aligned
//! splits at uniformly random positions. Points that are easy to isolate
//! (short average path length) are unusual. The decision threshold is the
//! `1 - contamination` quantile of the training scores, so roughly a
//! `contamination` share of the training population lands above it.
//!
//! Guarantees are about scores, not flags. A candidate far out on every
//! feature is flagged reliably. A candidate extreme on a single feature only
//! gets a shorter path in trees that split on that feature, roughly one
//! level in three, so against a small tight population it scores above the
//! bulk but often not above the threshold. Extreme points duplicated in the
//! training set can likewise tie with a far candidate.

use rand::seq::index::sample as sample_indices;
use rand::Rng;

use super::ModelFitError;
use crate::telemetry::FeatureVector;

const DIMS: usize = FeatureVector::DIMENSIONS;

/// Euler-Mascheroni constant, for the harmonic number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Per-feature variance at or below this is treated as constant.
pub const MIN_FEATURE_VARIANCE: f64 = 1e-12;

type Point = [f64; DIMS];

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_samples: usize,
    pub contamination: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted forest. Immutable once built.
#[derive(Debug)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    threshold: f64,
}

impl IsolationForest {
    /// Fit on `data`. Fails on an empty population, a non-finite feature, or
    /// a population whose features are all (near) constant.
    pub fn fit<R: Rng + ?Sized>(
        data: &[FeatureVector],
        params: &ForestParams,
        rng: &mut R,
    ) -> Result<Self, ModelFitError> {
        if data.is_empty() {
            return Err(ModelFitError::EmptyPopulation);
        }
        if let Some(index) = data.iter().position(|f| !f.is_finite()) {
            return Err(ModelFitError::NonFiniteFeature { index });
        }

        let points: Vec<Point> = data.iter().map(FeatureVector::to_array).collect();
        if is_degenerate(&points) {
            return Err(ModelFitError::DegenerateFeatures { samples: points.len() });
        }

        let sample_size = params.max_samples.min(points.len()).max(2);
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let subset: Vec<usize> = if sample_size >= points.len() {
                    (0..points.len()).collect()
                } else {
                    sample_indices(&mut *rng, points.len(), sample_size).into_vec()
                };
                build(&points, subset, 0, height_limit, &mut *rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        let mut training: Vec<f64> = points.iter().map(|p| forest.score_point(p)).collect();
        training.sort_by(f64::total_cmp);
        forest.threshold = quantile(&training, 1.0 - params.contamination);

        Ok(forest)
    }

    /// Anomaly score in (0, 1]; higher is more unusual, ~0.5 is unremarkable.
    pub fn score(&self, x: &FeatureVector) -> f64 {
        self.score_point(&x.to_array())
    }

    /// True when `x` scores above the contamination threshold.
    pub fn predict(&self, x: &FeatureVector) -> bool {
        self.score(x) > self.threshold
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn score_point(&self, p: &Point) -> f64 {
        let total: f64 = self.trees.iter().map(|t| path_length(t, p)).sum();
        let mean = total / self.trees.len() as f64;
        2f64.powf(-mean / average_path_length(self.sample_size))
    }
}

fn build<R: Rng + ?Sized>(
    points: &[Point],
    indices: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut R,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf { size: indices.len() };
    }

    let mut lo = [f64::INFINITY; DIMS];
    let mut hi = [f64::NEG_INFINITY; DIMS];
    for &i in &indices {
        for d in 0..DIMS {
            lo[d] = lo[d].min(points[i][d]);
            hi[d] = hi[d].max(points[i][d]);
        }
    }

    let splittable: Vec<usize> = (0..DIMS).filter(|&d| hi[d] > lo[d]).collect();
    if splittable.is_empty() {
        return Node::Leaf { size: indices.len() };
    }

    let feature = splittable[rng.gen_range(0..splittable.len())];
    let threshold = lo[feature] + (hi[feature] - lo[feature]) * rng.gen::<f64>();

    // `<=` keeps the minimum on the left and the maximum on the right, so
    // neither side is empty.
    let (left, right): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&i| points[i][feature] <= threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build(points, left, depth + 1, height_limit, rng)),
        right: Box::new(build(points, right, depth + 1, height_limit, rng)),
    }
}

fn path_length(root: &Node, p: &Point) -> f64 {
    let mut node = root;
    let mut depth = 0usize;
    loop {
        match node {
            Node::Leaf { size } => return depth as f64 + average_path_length(*size),
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                node = if p[*feature] <= *threshold { left } else { right };
                depth += 1;
            }
        }
    }
}

/// Expected path length of an unsuccessful BST search over `n` points,
/// used to normalise depths and to credit unexpanded leaves.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn is_degenerate(points: &[Point]) -> bool {
    let n = points.len() as f64;
    (0..DIMS).all(|d| {
        let mean = points.iter().map(|p| p[d]).sum::<f64>() / n;
        let variance = points.iter().map(|p| (p[d] - mean).powi(2)).sum::<f64>() / n;
        variance <= MIN_FEATURE_VARIANCE
    })
}

/// Linear-interpolated quantile of an ascending slice, `q` in [0, 1].
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::INFINITY;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
