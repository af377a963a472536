//! Forest artifacts: parsing, validation and fingerprinting
//!
//! Two document shapes are accepted and normalize to the same [`Forest`]:
//!
//! ```json
//! [ { "children_left": [...], "children_right": [...], "feature": [...],
//!     "threshold": [...], "value": [...] }, ... ]
//! ```
//!
//! ```json
//! { "n_estimators": 100, "feature_names": ["having_ip", ...], "trees": [ ... ] }
//! ```

use crate::errors::{ForestError, Result};
use crate::serde_canon::{hash_canonical, hash_canonical_hex, to_canonical_json};
use crate::tree::DecisionTree;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Feature index marking a node with no valid split
pub const LEAF_FEATURE_SENTINEL: i64 = -2;

/// Arrays every tree record must carry
pub const REQUIRED_TREE_FIELDS: [&str; 5] = [
    "children_left",
    "children_right",
    "feature",
    "threshold",
    "value",
];

/// An immutable ensemble of decision trees.
///
/// `n_estimators` always equals `trees.len()`; `feature_names` is metadata and
/// never consulted by inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forest {
    n_estimators: usize,
    feature_names: Option<Vec<String>>,
    trees: Vec<DecisionTree>,
}

impl Forest {
    /// Build a forest from decoded trees
    pub fn new(trees: Vec<DecisionTree>, feature_names: Option<Vec<String>>) -> Result<Self> {
        if trees.is_empty() {
            return Err(ForestError::validation("model contains no trees"));
        }
        Ok(Self {
            n_estimators: trees.len(),
            feature_names,
            trees,
        })
    }

    /// Normalize and validate an already decoded artifact
    pub fn parse(raw: &Value) -> Result<Self> {
        let (trees, declared, feature_names) = match raw {
            Value::Array(trees) => (trees, None, None),
            Value::Object(record) => {
                let trees = match record.get("trees") {
                    Some(Value::Array(trees)) => trees,
                    Some(_) => {
                        return Err(ForestError::validation("`trees` must be a list of tree records"))
                    }
                    None => return Err(ForestError::validation("model record has no `trees` field")),
                };
                let declared = record.get("n_estimators").and_then(Value::as_u64);
                let feature_names = record
                    .get("feature_names")
                    .filter(|names| !names.is_null())
                    .map(parse_feature_names)
                    .transpose()?;
                (trees, declared, feature_names)
            }
            _ => {
                return Err(ForestError::validation(
                    "model must be a list of trees or a record with a `trees` field",
                ))
            }
        };

        if trees.is_empty() {
            return Err(ForestError::validation("model contains no trees"));
        }

        let mut decoded = Vec::with_capacity(trees.len());
        for (position, element) in trees.iter().enumerate() {
            let record = element.as_object().ok_or_else(|| {
                ForestError::validation(format!("tree {position} is not a record"))
            })?;

            let missing: Vec<&'static str> = REQUIRED_TREE_FIELDS
                .iter()
                .copied()
                .filter(|field| !record.contains_key(*field))
                .collect();
            if !missing.is_empty() {
                return Err(ForestError::MissingFields {
                    tree: position,
                    missing,
                });
            }

            decoded.push(DecisionTree::from_record(position, record)?);
        }

        if let Some(declared) = declared {
            if declared as usize != decoded.len() {
                warn!(
                    declared,
                    loaded = decoded.len(),
                    "n_estimators does not match the number of trees; using the tree count"
                );
            }
        }

        let forest = Self::new(decoded, feature_names)?;
        let malformed = forest.malformed_leaves();
        if malformed > 0 {
            warn!(malformed, "forest contains leaves with unrecognised values");
        }
        debug!(trees = forest.num_trees(), "forest parsed");
        Ok(forest)
    }

    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(json)?;
        Self::parse(&raw)
    }

    /// Load a forest artifact from a JSON file
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        let forest = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            trees = forest.num_trees(),
            "loaded forest artifact"
        );
        Ok(forest)
    }

    /// Number of trees in the forest
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    /// Number of malformed leaves across all trees
    pub fn malformed_leaves(&self) -> usize {
        self.trees.iter().map(DecisionTree::malformed_leaves).sum()
    }

    /// Smallest feature vector length every split can be evaluated against
    pub fn min_feature_len(&self) -> usize {
        self.trees
            .iter()
            .filter_map(DecisionTree::max_feature_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    /// Serialize the normalized forest to canonical JSON
    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(to_canonical_json(self)?)
    }

    /// BLAKE3 hash of the canonical JSON form
    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(hash_canonical(self)?)
    }

    /// BLAKE3 hash of the canonical JSON form as hex
    pub fn hash_hex(&self) -> Result<String> {
        Ok(hash_canonical_hex(self)?)
    }

    /// Fail unless the forest fingerprint equals `expected` (case-insensitive)
    pub fn verify_hash(&self, expected: &str) -> Result<String> {
        let actual = self.hash_hex()?;
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(ForestError::HashMismatch {
                expected: expected.trim().to_string(),
                actual,
            });
        }
        Ok(actual)
    }
}

fn parse_feature_names(raw: &Value) -> Result<Vec<String>> {
    raw.as_array()
        .and_then(|names| {
            names
                .iter()
                .map(|name| name.as_str().map(str::to_owned))
                .collect::<Option<Vec<String>>>()
        })
        .ok_or_else(|| ForestError::validation("`feature_names` must be a list of strings"))
}
