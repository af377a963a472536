//! Process-wide model store
//!
//! Holds the currently served forest behind a single swappable `Arc`.
//! Readers clone the `Arc` under a short read lock and traverse without any
//! lock held; loads build and validate a complete forest first and then
//! publish it with one write. A failed load leaves the previous forest in
//! place.

use crate::errors::{ForestError, PredictError, Result};
use crate::forest::Forest;
use crate::inference::{predict_forest, Prediction};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A published forest together with its load-time facts
#[derive(Debug)]
pub struct ModelSnapshot {
    pub forest: Forest,
    pub fingerprint: String,
    pub source: Option<PathBuf>,
    pub loaded_at: SystemTime,
}

/// Summary returned to the caller of a successful load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub trees: usize,
    pub malformed_leaves: usize,
    pub fingerprint: String,
}

/// Counters exposed by `/health` and `/metrics`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub predictions_total: u64,
    pub prediction_errors_total: u64,
    pub malformed_leaf_total: u64,
    pub reloads_total: u64,
}

#[derive(Debug, Default)]
pub struct ModelStore {
    current: RwLock<Option<Arc<ModelSnapshot>>>,
    predictions: AtomicU64,
    prediction_errors: AtomicU64,
    malformed_leaves: AtomicU64,
    reloads: AtomicU64,
}

impl ModelStore {
    /// Create an empty store; predictions report `ModelUnavailable` until a
    /// forest is published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already serving `forest`
    pub fn with_forest(forest: Forest) -> Result<Self> {
        let store = Self::new();
        store.publish(forest, None)?;
        Ok(store)
    }

    /// Serve `forest`; only replacing an already served forest counts as a
    /// reload
    pub fn publish(&self, forest: Forest, source: Option<PathBuf>) -> Result<LoadReport> {
        let fingerprint = forest.hash_hex()?;
        let report = LoadReport {
            trees: forest.num_trees(),
            malformed_leaves: forest.malformed_leaves(),
            fingerprint: fingerprint.clone(),
        };

        let snapshot = Arc::new(ModelSnapshot {
            forest,
            fingerprint,
            source,
            loaded_at: SystemTime::now(),
        });
        let replaced = self.current.write().replace(snapshot).is_some();

        if replaced {
            self.reloads.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("forest_reloads_total").increment(1);
        }
        metrics::gauge!("forest_trees").set(report.trees as f64);
        info!(
            trees = report.trees,
            malformed_leaves = report.malformed_leaves,
            fingerprint = %report.fingerprint,
            replaced,
            "forest published"
        );
        Ok(report)
    }

    /// Load, optionally verify, and publish a forest artifact from disk
    pub fn load_from_path<P: AsRef<Path>>(
        &self,
        path: P,
        expected_hash: Option<&str>,
    ) -> Result<LoadReport> {
        let path = path.as_ref();
        let forest = Forest::load_json(path).map_err(|err| {
            warn!(path = %path.display(), error = %err, "forest load rejected");
            err
        })?;

        if let Some(expected) = expected_hash.filter(|h| !h.trim().is_empty()) {
            forest.verify_hash(expected).map_err(|err| {
                warn!(path = %path.display(), error = %err, "forest fingerprint rejected");
                err
            })?;
        }

        self.publish(forest, Some(path.to_path_buf()))
    }

    /// Reload from the path the current forest came from
    pub fn reload(&self, expected_hash: Option<&str>) -> Result<LoadReport> {
        let source = self
            .snapshot()
            .and_then(|snapshot| snapshot.source.clone())
            .ok_or_else(|| ForestError::validation("no model source to reload from"))?;
        self.load_from_path(source, expected_hash)
    }

    /// Current forest, if any
    pub fn snapshot(&self) -> Option<Arc<ModelSnapshot>> {
        self.current.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Classify one feature vector against the current forest
    pub fn predict(&self, features: &[f64]) -> std::result::Result<Prediction, PredictError> {
        let snapshot = self.snapshot();
        let outcome = predict_forest(snapshot.as_ref().map(|s| &s.forest), features);

        match &outcome {
            Ok(prediction) => {
                self.predictions.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("forest_predictions_total").increment(1);

                let anomalies = prediction.anomalies.len() as u64;
                if anomalies > 0 {
                    self.malformed_leaves.fetch_add(anomalies, Ordering::Relaxed);
                    metrics::counter!("forest_malformed_leaf_total").increment(anomalies);
                }
                debug!(
                    class_index = prediction.class_index,
                    votes = ?prediction.votes,
                    "prediction served"
                );
            }
            Err(err) => {
                self.prediction_errors.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("forest_prediction_errors_total").increment(1);
                debug!(error = %err, "prediction failed");
            }
        }

        outcome
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            predictions_total: self.predictions.load(Ordering::Relaxed),
            prediction_errors_total: self.prediction_errors.load(Ordering::Relaxed),
            malformed_leaf_total: self.malformed_leaves.load(Ordering::Relaxed),
            reloads_total: self.reloads.load(Ordering::Relaxed),
        }
    }
}
