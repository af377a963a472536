//! Error types for forest loading and inference

use thiserror::Error;

/// Errors raised while turning a decoded artifact into a usable [`Forest`].
///
/// Every variant is fatal to the load: a partially valid forest is never
/// produced.
///
/// [`Forest`]: crate::forest::Forest
#[derive(Error, Debug)]
pub enum ForestError {
    /// Artifact is structurally unusable (wrong top-level shape, empty trees,
    /// bad arrays, dangling children, cycles)
    #[error("Model validation failed: {0}")]
    Validation(String),

    /// A tree record lacks one or more of the required arrays
    #[error("Model validation failed: tree {tree} is missing required field(s): {}", .missing.join(", "))]
    MissingFields { tree: usize, missing: Vec<&'static str> },

    /// Fingerprint of the loaded forest does not match the pinned value
    #[error("Model hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Canonical serialization failed while fingerprinting
    #[error("Canonical serialization error: {0}")]
    Canonical(#[from] crate::serde_canon::CanonicalError),
}

impl ForestError {
    pub(crate) fn validation<S: Into<String>>(message: S) -> Self {
        ForestError::Validation(message.into())
    }
}

/// Errors raised by a single prediction request.
///
/// None of these abort the process; the HTTP layer maps each one to a
/// structured response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredictError {
    /// No forest is loaded (or the loaded forest has no trees)
    #[error("model unavailable: no forest is loaded")]
    ModelUnavailable,

    /// A split referenced a feature the caller did not supply
    #[error(
        "feature index {feature} out of range at tree {tree}, node {node} (feature vector has {len} values)"
    )]
    FeatureIndexOutOfRange {
        tree: usize,
        node: usize,
        feature: usize,
        len: usize,
    },

    /// Traversal did not reach a leaf within `n_nodes` steps
    #[error("traversal of tree {tree} exceeded {limit} steps")]
    TraversalLimitExceeded { tree: usize, limit: usize },
}

/// Result type for forest loading
pub type Result<T> = std::result::Result<T, ForestError>;
