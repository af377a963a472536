//! Arena-encoded decision trees
//!
//! A tree is a flat `Vec<Node>` indexed by node id; node 0 is the root and
//! children are referenced by index, never by pointer. Nodes are decoded into
//! an explicit [`Node::Internal`] / [`Node::Leaf`] variant when the tree is
//! built, so traversal never has to interpret sentinel values.

use crate::errors::{ForestError, Result};
use serde::Serialize;
use serde_json::Value;

/// A decision tree node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Split node: go `left` when `features[feature] <= threshold`, else `right`
    Internal {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node carrying per-class weights
    Leaf { value: LeafValue },
}

impl Node {
    pub fn internal(feature: usize, threshold: f64, left: usize, right: usize) -> Self {
        Node::Internal {
            feature,
            threshold,
            left,
            right,
        }
    }

    pub fn leaf(weights: Vec<f64>) -> Self {
        Node::Leaf {
            value: LeafValue::from_weights(weights),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Per-class weights stored at a leaf.
///
/// Artifacts record leaf statistics either flat (`[w0, w1]`) or wrapped in a
/// single-element list (`[[w0, w1]]`); both decode to `Weights`. Anything else
/// decodes to `Malformed`, which still votes (for class 0) but is reported as
/// an anomaly at prediction time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafValue {
    Weights(Vec<f64>),
    Malformed,
}

impl LeafValue {
    /// Class used when a leaf value cannot be interpreted
    pub const DEFAULT_CLASS: usize = 0;

    pub fn from_weights(weights: Vec<f64>) -> Self {
        if weights.is_empty() {
            LeafValue::Malformed
        } else {
            LeafValue::Weights(weights)
        }
    }

    /// Decode a raw `value[i]` entry, accepting flat and singly-nested shapes
    pub fn from_raw(raw: &Value) -> Self {
        let Some(items) = raw.as_array() else {
            return LeafValue::Malformed;
        };

        let flat = match items.as_slice() {
            [Value::Array(inner)] => inner,
            _ => items,
        };

        flat.iter()
            .map(Value::as_f64)
            .collect::<Option<Vec<f64>>>()
            .map(LeafValue::from_weights)
            .unwrap_or(LeafValue::Malformed)
    }

    /// Index of the heaviest class; the lowest index wins ties
    pub fn class_index(&self) -> Option<usize> {
        match self {
            LeafValue::Weights(weights) => {
                let mut best = 0usize;
                for (idx, weight) in weights.iter().enumerate().skip(1) {
                    if *weight > weights[best] {
                        best = idx;
                    }
                }
                Some(best)
            }
            LeafValue::Malformed => None,
        }
    }

    /// Weights scaled to sum to one.
    ///
    /// A leaf with no positive mass (or a malformed leaf) is reported as a
    /// one-hot distribution on the class it votes for.
    pub fn distribution(&self) -> Vec<f64> {
        if let LeafValue::Weights(weights) = self {
            let total: f64 = weights.iter().sum();
            if total > 0.0 {
                return weights.iter().map(|w| w / total).collect();
            }
        }

        let class = self.class_index().unwrap_or(Self::DEFAULT_CLASS);
        let mut one_hot = vec![0.0; class + 1];
        one_hot[class] = 1.0;
        one_hot
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, LeafValue::Malformed)
    }
}

/// A single decision tree stored as an arena of nodes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Build a tree from already decoded nodes, checking child bounds and
    /// rejecting cycles reachable from the root.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self> {
        let tree = Self { nodes };
        tree.validate().map_err(ForestError::validation)?;
        Ok(tree)
    }

    /// Number of nodes (`n_nodes`)
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// Number of leaves whose value could not be decoded
    pub fn malformed_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { value } if value.is_malformed()))
            .count()
    }

    /// Largest feature index referenced by any split
    pub fn max_feature_index(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Internal { feature, .. } => Some(*feature),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    /// Validate tree structure
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }

        let n_nodes = self.nodes.len();
        for (id, node) in self.nodes.iter().enumerate() {
            if let Node::Internal { left, right, .. } = node {
                if *left >= n_nodes {
                    return Err(format!("Node {id} has invalid left child: {left}"));
                }
                if *right >= n_nodes {
                    return Err(format!("Node {id} has invalid right child: {right}"));
                }
                if left == right {
                    return Err(format!("Internal node {id} has identical children: {left}"));
                }
            }
        }

        self.check_acyclic()
    }

    // Iterative three-colour DFS from the root.
    fn check_acyclic(&self) -> std::result::Result<(), String> {
        const WHITE: u8 = 0;
        const GREY: u8 = 1;
        const BLACK: u8 = 2;

        let mut colour = vec![WHITE; self.nodes.len()];
        let mut stack: Vec<(usize, bool)> = vec![(0, false)];

        while let Some((id, children_done)) = stack.pop() {
            if children_done {
                colour[id] = BLACK;
                continue;
            }
            match colour[id] {
                BLACK => continue,
                GREY => return Err(format!("Cycle detected through node {id}")),
                _ => {}
            }
            colour[id] = GREY;
            stack.push((id, true));

            if let Node::Internal { left, right, .. } = &self.nodes[id] {
                for child in [*right, *left] {
                    match colour[child] {
                        GREY => {
                            return Err(format!("Cycle detected: node {id} points back to {child}"))
                        }
                        WHITE => stack.push((child, false)),
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Decode one tree record of the parallel-array artifact format.
    ///
    /// `position` is the tree's index inside the forest and only feeds error
    /// messages. Required fields have already been checked by the caller.
    pub(crate) fn from_record(
        position: usize,
        record: &serde_json::Map<String, Value>,
    ) -> Result<Self> {
        let children_left = int_array(position, record, "children_left")?;
        let children_right = int_array(position, record, "children_right")?;
        let feature = int_array(position, record, "feature")?;
        let threshold = array(position, record, "threshold")?;
        let value = array(position, record, "value")?;

        let n_nodes = children_left.len();
        if n_nodes == 0 {
            return Err(ForestError::validation(format!("tree {position} has no nodes")));
        }
        let lengths = [
            ("children_right", children_right.len()),
            ("feature", feature.len()),
            ("threshold", threshold.len()),
            ("value", value.len()),
        ];
        for (field, len) in lengths {
            if len != n_nodes {
                return Err(ForestError::validation(format!(
                    "tree {position}: `{field}` has {len} entries, expected {n_nodes}"
                )));
            }
        }

        let mut nodes = Vec::with_capacity(n_nodes);
        for id in 0..n_nodes {
            let (left, right, split) = (children_left[id], children_right[id], feature[id]);

            if left == right || split == crate::forest::LEAF_FEATURE_SENTINEL {
                nodes.push(Node::Leaf {
                    value: LeafValue::from_raw(&value[id]),
                });
                continue;
            }

            let feature = usize::try_from(split).map_err(|_| {
                ForestError::validation(format!(
                    "tree {position}, node {id}: invalid feature index {split}"
                ))
            })?;
            let child = |raw: i64, side: &str| {
                usize::try_from(raw)
                    .ok()
                    .filter(|c| *c < n_nodes)
                    .ok_or_else(|| {
                        ForestError::validation(format!(
                            "tree {position}, node {id}: invalid {side} child {raw}"
                        ))
                    })
            };
            let left = child(left, "left")?;
            let right = child(right, "right")?;
            let threshold = threshold[id].as_f64().ok_or_else(|| {
                ForestError::validation(format!(
                    "tree {position}, node {id}: threshold is not a number"
                ))
            })?;

            nodes.push(Node::Internal {
                feature,
                threshold,
                left,
                right,
            });
        }

        let tree = Self { nodes };
        tree.validate()
            .map_err(|reason| ForestError::validation(format!("tree {position}: {reason}")))?;
        Ok(tree)
    }
}

fn array<'a>(
    position: usize,
    record: &'a serde_json::Map<String, Value>,
    field: &str,
) -> Result<&'a Vec<Value>> {
    record
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ForestError::validation(format!("tree {position}: `{field}` must be a list"))
        })
}

fn int_array(
    position: usize,
    record: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<Vec<i64>> {
    array(position, record, field)?
        .iter()
        .enumerate()
        .map(|(id, item)| {
            as_integer(item).ok_or_else(|| {
                ForestError::validation(format!(
                    "tree {position}: `{field}[{id}]` is not an integer"
                ))
            })
        })
        .collect()
}

// numpy exports sometimes write integral floats such as `-2.0`.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn leaf_value_accepts_flat_and_nested() {
        let flat = LeafValue::from_raw(&json!([7.0, 3.0]));
        let nested = LeafValue::from_raw(&json!([[7.0, 3.0]]));
        assert_eq!(flat, nested);
        assert_eq!(flat.class_index(), Some(0));
    }

    #[test]
    fn leaf_value_rejects_unknown_shapes() {
        assert!(LeafValue::from_raw(&json!([])).is_malformed());
        assert!(LeafValue::from_raw(&json!([[]])).is_malformed());
        assert!(LeafValue::from_raw(&json!(3.0)).is_malformed());
        assert!(LeafValue::from_raw(&json!([[1.0], [2.0]])).is_malformed());
        assert!(LeafValue::from_raw(&json!([[[1.0, 2.0]]])).is_malformed());
        assert!(LeafValue::from_raw(&json!(["a", "b"])).is_malformed());
        assert_eq!(LeafValue::Malformed.class_index(), None);
    }

    #[test]
    fn class_index_ties_go_to_lowest() {
        assert_eq!(LeafValue::from_weights(vec![2.0, 5.0, 5.0]).class_index(), Some(1));
        assert_eq!(LeafValue::from_weights(vec![4.0, 4.0]).class_index(), Some(0));
        assert_eq!(LeafValue::from_weights(vec![0.0, 0.0, 1.0]).class_index(), Some(2));
    }

    #[test]
    fn distribution_normalizes_weights() {
        let dist = LeafValue::from_weights(vec![3.0, 1.0]).distribution();
        assert_eq!(dist, vec![0.75, 0.25]);

        assert_eq!(LeafValue::from_weights(vec![0.0, 0.0]).distribution(), vec![1.0]);
        assert_eq!(LeafValue::Malformed.distribution(), vec![1.0]);
    }

    #[test]
    fn decodes_sklearn_style_record() {
        let raw = record(json!({
            "n_nodes": 3,
            "children_left": [1, -1, -1],
            "children_right": [2, -1, -1],
            "feature": [0, -2, -2],
            "threshold": [0.5, -2.0, -2.0],
            "value": [[[0.0, 0.0]], [[1.0, 0.0]], [[0.0, 1.0]]]
        }));

        let tree = DecisionTree::from_record(0, &raw).unwrap();
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.root(), Some(&Node::internal(0, 0.5, 1, 2)));
        assert!(tree.node(1).unwrap().is_leaf());
        assert!(tree.node(2).unwrap().is_leaf());
        assert_eq!(tree.malformed_leaves(), 0);
        assert_eq!(tree.max_feature_index(), Some(0));
    }

    #[test]
    fn sentinel_feature_makes_a_leaf_regardless_of_children() {
        let raw = record(json!({
            "children_left": [1, 5],
            "children_right": [1, 7],
            "feature": [-2, -2],
            "threshold": [0.0, 0.0],
            "value": [[1.0, 2.0], [3.0, 0.0]]
        }));

        let tree = DecisionTree::from_record(0, &raw).unwrap();
        assert!(tree.nodes().iter().all(Node::is_leaf));
    }

    #[test]
    fn rejects_length_mismatch() {
        let raw = record(json!({
            "children_left": [1, -1, -1],
            "children_right": [2, -1],
            "feature": [0, -2, -2],
            "threshold": [0.5, -2.0, -2.0],
            "value": [[0.0], [1.0], [1.0]]
        }));

        let err = DecisionTree::from_record(4, &raw).unwrap_err().to_string();
        assert!(err.contains("tree 4"));
        assert!(err.contains("children_right"));
    }

    #[test]
    fn rejects_out_of_range_child() {
        let raw = record(json!({
            "children_left": [1, -1, -1],
            "children_right": [9, -1, -1],
            "feature": [0, -2, -2],
            "threshold": [0.5, -2.0, -2.0],
            "value": [[0.0], [1.0], [1.0]]
        }));

        let err = DecisionTree::from_record(0, &raw).unwrap_err().to_string();
        assert!(err.contains("invalid right child 9"));
    }

    #[test]
    fn rejects_cycles() {
        let nodes = vec![
            Node::internal(0, 0.5, 1, 2),
            Node::internal(0, 0.2, 0, 2),
            Node::leaf(vec![1.0]),
        ];
        let err = DecisionTree::from_nodes(nodes).unwrap_err().to_string();
        assert!(err.contains("Cycle"));
    }

    #[test]
    fn shared_subtrees_are_not_cycles() {
        let nodes = vec![
            Node::internal(0, 0.5, 1, 2),
            Node::internal(1, 0.5, 2, 3),
            Node::leaf(vec![1.0, 0.0]),
            Node::leaf(vec![0.0, 1.0]),
        ];
        assert!(DecisionTree::from_nodes(nodes).is_ok());
    }

    #[test]
    fn accepts_integral_floats_in_index_arrays() {
        let raw = record(json!({
            "children_left": [1.0, -1.0, -1.0],
            "children_right": [2.0, -1.0, -1.0],
            "feature": [0.0, -2.0, -2.0],
            "threshold": [0.5, -2.0, -2.0],
            "value": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]
        }));
        assert!(DecisionTree::from_record(0, &raw).is_ok());
    }
}
