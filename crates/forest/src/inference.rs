//! Tree traversal and majority-vote aggregation
//!
//! Traversal compares `features[f] <= threshold` and goes left on true, right
//! otherwise (a NaN feature therefore always goes right). Every tree casts one
//! vote for the heaviest class at its leaf; the forest returns the class with
//! the most votes, lowest index first on ties.

use crate::errors::PredictError;
use crate::forest::Forest;
use crate::tree::{DecisionTree, LeafValue, Node};
use serde::Serialize;
use tracing::warn;

/// Outcome of running one tree to a leaf
#[derive(Debug, Clone, PartialEq)]
pub struct TreeVote {
    pub class_index: usize,
    /// Node id of the leaf that was reached
    pub leaf: usize,
    /// Normalized class weights at that leaf
    pub distribution: Vec<f64>,
    /// The leaf value could not be decoded and `class_index` is the default
    pub malformed: bool,
}

/// A leaf whose value had to be replaced by the default class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeAnomaly {
    pub tree: usize,
    pub node: usize,
}

/// Aggregated forest prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Majority-vote class
    pub class_index: usize,
    /// Vote count per class index
    pub votes: Vec<usize>,
    /// Mean of the per-tree leaf distributions
    pub probabilities: Vec<f64>,
    /// Leaves that voted with the default class
    pub anomalies: Vec<NodeAnomaly>,
}

/// Run one tree from the root to a leaf and report its vote.
///
/// The walk is bounded to `n_nodes` steps. Errors carry tree position `0`;
/// [`predict_forest`] rewrites it to the real position.
pub fn predict_single_tree(
    tree: &DecisionTree,
    features: &[f64],
) -> Result<TreeVote, PredictError> {
    let limit = tree.n_nodes();
    let mut id = 0usize;

    for _ in 0..limit {
        match tree.node(id) {
            Some(Node::Leaf { value }) => return Ok(vote_at(id, value)),
            Some(Node::Internal {
                feature,
                threshold,
                left,
                right,
            }) => {
                let x = features.get(*feature).copied().ok_or(
                    PredictError::FeatureIndexOutOfRange {
                        tree: 0,
                        node: id,
                        feature: *feature,
                        len: features.len(),
                    },
                )?;
                id = if x <= *threshold { *left } else { *right };
            }
            None => break,
        }
    }

    Err(PredictError::TraversalLimitExceeded { tree: 0, limit })
}

fn vote_at(leaf: usize, value: &LeafValue) -> TreeVote {
    TreeVote {
        class_index: value.class_index().unwrap_or(LeafValue::DEFAULT_CLASS),
        leaf,
        distribution: value.distribution(),
        malformed: value.is_malformed(),
    }
}

/// Predict with every tree of `forest` and combine by majority vote.
///
/// `None` (no model loaded) and a forest without trees both report
/// [`PredictError::ModelUnavailable`].
pub fn predict_forest(
    forest: Option<&Forest>,
    features: &[f64],
) -> Result<Prediction, PredictError> {
    let forest = forest
        .filter(|forest| forest.num_trees() > 0)
        .ok_or(PredictError::ModelUnavailable)?;

    let mut classes = Vec::with_capacity(forest.num_trees());
    let mut probabilities: Vec<f64> = Vec::new();
    let mut anomalies = Vec::new();

    for (position, tree) in forest.trees().iter().enumerate() {
        let vote = predict_single_tree(tree, features).map_err(|err| err.at_tree(position))?;

        if vote.malformed {
            warn!(
                tree = position,
                node = vote.leaf,
                "malformed leaf value, voting for default class"
            );
            anomalies.push(NodeAnomaly {
                tree: position,
                node: vote.leaf,
            });
        }

        if probabilities.len() < vote.distribution.len() {
            probabilities.resize(vote.distribution.len(), 0.0);
        }
        for (slot, p) in probabilities.iter_mut().zip(&vote.distribution) {
            *slot += p;
        }
        classes.push(vote.class_index);
    }

    let n_trees = classes.len() as f64;
    probabilities.iter_mut().for_each(|p| *p /= n_trees);

    let votes = tally(&classes);
    let class_index = argmax_first(&votes).ok_or(PredictError::ModelUnavailable)?;

    Ok(Prediction {
        class_index,
        votes,
        probabilities,
        anomalies,
    })
}

/// Mode of the per-tree class indices; the lowest class wins ties.
pub fn majority_vote(classes: &[usize]) -> Option<usize> {
    argmax_first(&tally(classes))
}

fn tally(classes: &[usize]) -> Vec<usize> {
    let n_classes = classes.iter().max().map_or(0, |max| max + 1);
    let mut votes = vec![0usize; n_classes];
    for class in classes {
        votes[*class] += 1;
    }
    votes
}

fn argmax_first(votes: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (class, count) in votes.iter().enumerate() {
        if best.map_or(true, |b| *count > votes[b]) {
            best = Some(class);
        }
    }
    best
}

impl PredictError {
    /// Attach the forest position of the tree that failed
    pub(crate) fn at_tree(self, position: usize) -> Self {
        match self {
            PredictError::FeatureIndexOutOfRange {
                node, feature, len, ..
            } => PredictError::FeatureIndexOutOfRange {
                tree: position,
                node,
                feature,
                len,
            },
            PredictError::TraversalLimitExceeded { limit, .. } => {
                PredictError::TraversalLimitExceeded {
                    tree: position,
                    limit,
                }
            }
            other => other,
        }
    }
}

impl Forest {
    /// Convenience wrapper around [`predict_forest`]
    pub fn predict(&self, features: &[f64]) -> Result<Prediction, PredictError> {
        predict_forest(Some(self), features)
    }
}
