//! Federation Types
//!
//! Training input and the two update shapes exchanged with the server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{FederationError, FederationResult};
use crate::logic::fingerprint::FingerprintRecord;
use crate::logic::tensor::TensorMap;

// ============================================================================
// TRAINING DATA
// ============================================================================

/// Local samples: one row per example
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub features: Array2<f64>,
    /// Binary labels (1.0 = high risk)
    pub labels: Option<Array1<f64>>,
}

impl TrainingData {
    pub fn new(features: Array2<f64>, labels: Array1<f64>) -> Self {
        Self {
            features,
            labels: Some(labels),
        }
    }

    pub fn unlabeled(features: Array2<f64>) -> Self {
        Self {
            features,
            labels: None,
        }
    }

    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels, required for training
    pub fn require_labels(&self) -> FederationResult<&Array1<f64>> {
        let labels = self
            .labels
            .as_ref()
            .ok_or_else(|| FederationError::Training("training data has no labels".to_string()))?;

        if labels.len() != self.len() {
            return Err(FederationError::Training(format!(
                "{} labels for {} samples",
                labels.len(),
                self.len()
            )));
        }
        Ok(labels)
    }
}

// ============================================================================
// MODEL UPDATE
// ============================================================================

/// Output of one local training round; consumed by a single submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUpdate {
    /// `{organization_id}-{counter:06}`
    pub update_id: String,
    pub organization_id: String,
    /// Global version the round started from
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
    /// Weight delta (final - initial) per named tensor
    pub gradients: TensorMap,
    pub sample_count: usize,
    pub local_metrics: BTreeMap<String, f64>,
    pub fingerprints: Vec<FingerprintRecord>,
}

// ============================================================================
// GLOBAL UPDATE
// ============================================================================

/// Aggregate distributed by the federation server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalUpdate {
    pub update_id: String,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
    pub aggregated_weights: TensorMap,
    pub global_metrics: BTreeMap<String, f64>,
    pub participating_orgs: usize,
    pub new_fingerprints: Vec<FingerprintRecord>,
}

// ============================================================================
// CONTRIBUTION STATUS
// ============================================================================

/// Progress of the periodic contribution loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContributionStatus {
    pub rounds_completed: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub last_submission: Option<DateTime<Utc>>,
    pub last_global_version: Option<String>,
    pub last_global_fetch: Option<DateTime<Utc>>,
    /// Most recent failures, oldest first
    pub errors: Vec<String>,
}

impl ContributionStatus {
    pub(crate) fn record_error(&mut self, error: String, limit: usize) {
        self.errors.push(error);
        if self.errors.len() > limit {
            let excess = self.errors.len() - limit;
            self.errors.drain(..excess);
        }
    }
}
