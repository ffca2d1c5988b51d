//! Federation Client
//!
//! Produces privacy-protected updates from the local model, submits them
//! and folds global updates back into local state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ndarray::{Array1, Array2};
use parking_lot::{Mutex, RwLock};

use super::metrics::evaluate;
use super::model::{extract_weights, LocalModel};
use super::transport::FederationTransport;
use super::types::{ContributionStatus, GlobalUpdate, ModelUpdate, TrainingData};
use crate::config::FederationConfig;
use crate::constants::{FINGERPRINT_SAMPLE_LIMIT, HIGH_RISK_PATTERN, INITIAL_MODEL_VERSION};
use crate::error::{FederationError, FederationResult, TransportError};
use crate::logic::fingerprint::{
    anonymize_source, fingerprint_id, quantize, FingerprintRecord, Severity, ThreatFingerprint,
    ThreatFingerprintStore,
};
use crate::logic::privacy::DifferentialPrivacy;
use crate::logic::secure_agg::{masked_aggregation, MaskingContext};
use crate::logic::tensor::{assert_same_shape, TensorMap};

pub struct FederationClient<M, T> {
    config: FederationConfig,
    model: Mutex<M>,
    transport: T,
    privacy: Option<Arc<DifferentialPrivacy>>,
    store: Arc<ThreatFingerprintStore>,
    masking: RwLock<Option<MaskingContext>>,
    update_counter: AtomicU64,
    last_global_version: RwLock<Option<String>>,
    pub(crate) status: RwLock<ContributionStatus>,
}

impl<M: LocalModel, T: FederationTransport> FederationClient<M, T> {
    pub fn new(config: FederationConfig, model: M, transport: T) -> Self {
        Self {
            config,
            model: Mutex::new(model),
            transport,
            privacy: None,
            store: Arc::new(ThreatFingerprintStore::new()),
            masking: RwLock::new(None),
            update_counter: AtomicU64::new(0),
            last_global_version: RwLock::new(None),
            status: RwLock::new(ContributionStatus::default()),
        }
    }

    /// Route gradients through this engine before they leave `train_local`
    pub fn with_privacy_engine(mut self, engine: Arc<DifferentialPrivacy>) -> Self {
        self.privacy = Some(engine);
        self
    }

    /// Share a registry with other components (matching, health checks)
    pub fn with_fingerprint_store(mut self, store: Arc<ThreatFingerprintStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_masking_context(self, context: MaskingContext) -> Self {
        *self.masking.write() = Some(context);
        self
    }

    /// Install pairwise seeds once the parties of a round are known
    pub fn set_masking_context(&self, context: MaskingContext) {
        *self.masking.write() = Some(context);
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn privacy_engine(&self) -> Option<&Arc<DifferentialPrivacy>> {
        self.privacy.as_ref()
    }

    pub fn fingerprint_store(&self) -> &Arc<ThreatFingerprintStore> {
        &self.store
    }

    /// Global version the next update will be based on
    pub fn model_version(&self) -> String {
        self.last_global_version
            .read()
            .clone()
            .unwrap_or_else(|| INITIAL_MODEL_VERSION.to_string())
    }

    pub fn contribution_status(&self) -> ContributionStatus {
        self.status.read().clone()
    }

    /// Run `local_epochs` epochs and package the weight delta as an update
    ///
    /// Blocks for the duration of training.
    pub fn train_local(
        &self,
        training: &TrainingData,
        validation: Option<&TrainingData>,
    ) -> FederationResult<ModelUpdate> {
        let labels = training.require_labels()?;

        let (gradients, local_metrics) = {
            let mut model = self.model.lock();
            let initial = extract_weights(&*model)?.into_tensors();

            for _ in 0..self.config.local_epochs {
                model.train_epoch(&training.features, labels)?;
            }

            let trained = extract_weights(&*model)?.into_tensors();
            let gradients = weight_delta(&initial, &trained)?;

            let metrics = match validation {
                Some(v) => evaluate(&*model, &v.features, v.require_labels()?),
                None => BTreeMap::new(),
            };
            (gradients, metrics)
        };

        let gradients = match &self.privacy {
            Some(engine) => engine.add_noise(
                &gradients,
                Some(self.config.privacy_epsilon),
                Some(self.config.privacy_delta),
            )?,
            None => gradients,
        };

        let fingerprints = self.extract_fingerprints(&training.features, labels);
        let counter = self.update_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let update = ModelUpdate {
            update_id: format!("{}-{:06}", self.config.organization_id, counter),
            organization_id: self.config.organization_id.clone(),
            model_version: self.model_version(),
            timestamp: Utc::now(),
            gradients,
            sample_count: training.len(),
            local_metrics,
            fingerprints,
        };

        tracing::info!(
            update_id = %update.update_id,
            samples = update.sample_count,
            tensors = update.gradients.len(),
            fingerprints = update.fingerprints.len(),
            private = self.privacy.is_some(),
            "Local training round complete"
        );

        Ok(update)
    }

    /// Anonymized signatures of positive samples among the first rows
    fn extract_fingerprints(
        &self,
        features: &Array2<f64>,
        labels: &Array1<f64>,
    ) -> Vec<FingerprintRecord> {
        let source = anonymize_source(&self.config.organization_id);

        features
            .rows()
            .into_iter()
            .zip(labels.iter())
            .take(FINGERPRINT_SAMPLE_LIMIT)
            .filter(|(_, label)| **label == 1.0)
            .map(|(row, _)| {
                let values: Vec<f64> = row.iter().copied().collect();
                let signature = quantize(&values);
                FingerprintRecord {
                    fingerprint_id: Some(fingerprint_id(HIGH_RISK_PATTERN, &signature)),
                    pattern_type: HIGH_RISK_PATTERN.to_string(),
                    feature_signature: signature,
                    severity: Severity::High,
                    source: Some(source.clone()),
                }
            })
            .collect()
    }

    /// Submit an update; `Ok(false)` when it is too small or the server refuses it
    ///
    /// Undersized updates never reach the transport.
    pub async fn submit_update(&self, update: ModelUpdate) -> FederationResult<bool> {
        if update.sample_count < self.config.min_samples_for_update {
            tracing::info!(
                update_id = %update.update_id,
                samples = update.sample_count,
                required = self.config.min_samples_for_update,
                "Update rejected: insufficient samples"
            );
            return Ok(false);
        }

        let update = if self.config.enable_secure_aggregation {
            self.mask_update(update)?
        } else {
            tracing::warn!(update_id = %update.update_id, "Secure aggregation disabled, submitting unmasked gradients");
            update
        };

        match self.transport.submit(&update).await {
            Ok(accepted) => {
                tracing::info!(update_id = %update.update_id, accepted, "Update submitted");
                Ok(accepted)
            }
            Err(TransportError::Rejected(reason)) => {
                tracing::warn!(update_id = %update.update_id, %reason, "Update refused by federation server");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mask_update(&self, mut update: ModelUpdate) -> FederationResult<ModelUpdate> {
        let masking = self.masking.read();
        let context = masking.as_ref().ok_or(FederationError::MissingMaskingContext)?;

        update.gradients =
            masked_aggregation(&update.gradients, context.party_id, &context.pair_seeds);
        tracing::debug!(
            update_id = %update.update_id,
            party_id = context.party_id,
            counterparts = context.pair_seeds.len(),
            "Gradients masked"
        );
        Ok(update)
    }

    pub async fn get_global_update(&self) -> FederationResult<Option<GlobalUpdate>> {
        let update = self.transport.fetch_global().await?;
        if update.is_none() {
            tracing::debug!("No global update available");
        }
        Ok(update)
    }

    /// Adopt the global version as baseline and import shared fingerprints
    ///
    /// Model weights are left to the local model; retention runs afterwards.
    pub fn apply_global_update(&self, update: &GlobalUpdate) {
        *self.last_global_version.write() = Some(update.model_version.clone());

        let imported = self.store.import_fingerprints(&update.new_fingerprints);
        let pruned = self.store.prune(Utc::now());

        tracing::info!(
            model_version = %update.model_version,
            participants = update.participating_orgs,
            imported,
            pruned,
            "Global update applied"
        );
    }

    /// Known fingerprints whose signature equals the quantized features
    pub fn check_fingerprint_match(&self, features: &[f64]) -> Vec<ThreatFingerprint> {
        self.store.exact_matches(features)
    }
}

/// final - initial for every tensor present before training
fn weight_delta(initial: &TensorMap, trained: &TensorMap) -> FederationResult<TensorMap> {
    initial
        .iter()
        .map(|(key, before)| {
            let after = trained.get(key).ok_or_else(|| {
                FederationError::Training(format!("tensor '{}' missing after training", key))
            })?;
            assert_same_shape(key, before, after);
            Ok((key.clone(), after - before))
        })
        .collect()
}
