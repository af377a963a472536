//! Random-forest inference for PhishGuard URL classification
//!
//! Loads decision-tree ensembles exported as flat parallel node arrays and
//! classifies feature vectors by majority vote across trees.
//!
//! Modules:
//! - `tree`: arena-encoded decision tree and leaf value decoding
//! - `forest`: artifact parsing, validation and fingerprinting
//! - `inference`: single-tree traversal and forest majority vote
//! - `store`: process-wide, atomically swappable forest snapshot
//! - `url_features`: lexical feature extraction from raw URLs
//! - `serde_canon`: canonical JSON and BLAKE3 hashing helpers

pub mod errors;
pub mod forest;
pub mod inference;
pub mod serde_canon;
pub mod store;
pub mod tree;
pub mod url_features;

pub use errors::{ForestError, PredictError};
pub use forest::{Forest, LEAF_FEATURE_SENTINEL, REQUIRED_TREE_FIELDS};
pub use inference::{
    majority_vote, predict_forest, predict_single_tree, NodeAnomaly, Prediction, TreeVote,
};
pub use store::{LoadReport, ModelSnapshot, ModelStore, StoreStats};
pub use tree::{DecisionTree, LeafValue, Node};
pub use url_features::{
    UrlFeatureExtractor, UrlFeatures, NETWORK_FEATURE_FALLBACK, URL_FEATURE_NAMES,
};

/// Crate version string reported by the service and tools
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load a forest artifact from disk (convenience wrapper for tools)
pub fn load_forest_from_path<P: AsRef<std::path::Path>>(path: P) -> errors::Result<Forest> {
    Forest::load_json(path)
}

/// Compute the canonical BLAKE3 fingerprint (hex) of a forest.
pub fn forest_hash_hex(forest: &Forest) -> errors::Result<String> {
    forest.hash_hex()
}
