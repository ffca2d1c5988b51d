//! Federated Aggregator
//!
//! Server side of a round: collect updates, reject stale ones, combine
//! them into the global weights and publish a `GlobalUpdate`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};

use super::types::{AggregationMethod, AggregationRound, RoundStatus};
use crate::constants::{DEFAULT_MIN_PARTICIPANTS, DEFAULT_STALENESS_HOURS, GLOBAL_FINGERPRINT_LIMIT};
use crate::error::{FederationError, FederationResult};
use crate::logic::federation::{GlobalUpdate, ModelUpdate};
use crate::logic::fingerprint::{fingerprint_id, FingerprintRecord};
use crate::logic::tensor::{assert_same_shape, TensorMap};

pub struct FederatedAggregator {
    method: AggregationMethod,
    min_participants: usize,
    staleness_threshold: Duration,
    current_round: Option<AggregationRound>,
    pending: Vec<ModelUpdate>,
    global_weights: TensorMap,
    round_counter: u64,
    global_fingerprints: Vec<FingerprintRecord>,
}

impl Default for FederatedAggregator {
    fn default() -> Self {
        Self::new(AggregationMethod::FedAvg)
    }
}

impl FederatedAggregator {
    pub fn new(method: AggregationMethod) -> Self {
        Self {
            method,
            min_participants: DEFAULT_MIN_PARTICIPANTS,
            staleness_threshold: Duration::hours(DEFAULT_STALENESS_HOURS),
            current_round: None,
            pending: Vec::new(),
            global_weights: TensorMap::new(),
            round_counter: 0,
            global_fingerprints: Vec::new(),
        }
    }

    pub fn with_min_participants(mut self, min_participants: usize) -> Self {
        self.min_participants = min_participants;
        self
    }

    pub fn with_staleness_hours(mut self, hours: i64) -> Self {
        self.staleness_threshold = Duration::hours(hours);
        self
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    pub fn min_participants(&self) -> usize {
        self.min_participants
    }

    /// Open a new round; updates pending from the previous one are dropped
    pub fn start_round(&mut self) -> AggregationRound {
        self.round_counter += 1;
        self.pending.clear();

        let round = AggregationRound {
            round_id: format!("round-{:06}", self.round_counter),
            started_at: Utc::now(),
            completed_at: None,
            participating_orgs: 0,
            total_samples: 0,
            aggregated_metrics: BTreeMap::new(),
            status: RoundStatus::InProgress,
        };
        tracing::info!(round_id = %round.round_id, method = %self.method, "Aggregation round started");

        self.current_round = Some(round.clone());
        round
    }

    pub fn add_update(&mut self, update: ModelUpdate) -> bool {
        self.add_update_at(update, Utc::now())
    }

    /// Accept an update into the open round (one is started if needed)
    ///
    /// Returns false for malformed or stale updates.
    pub fn add_update_at(&mut self, update: ModelUpdate, now: DateTime<Utc>) -> bool {
        let needs_round = self
            .current_round
            .as_ref()
            .map_or(true, |r| r.status == RoundStatus::Completed);
        if needs_round {
            self.start_round();
        }

        if update.organization_id.is_empty() || update.gradients.is_empty() {
            tracing::debug!(update_id = %update.update_id, "Malformed update rejected");
            return false;
        }

        let age = now - update.timestamp;
        if age > self.staleness_threshold {
            tracing::debug!(
                update_id = %update.update_id,
                age_hours = age.num_hours(),
                "Stale update rejected"
            );
            return false;
        }

        self.global_fingerprints.extend(update.fingerprints.iter().cloned());
        self.pending.push(update);

        let participants = self.participant_count();
        if let Some(round) = self.current_round.as_mut() {
            round.participating_orgs = participants;
            round.total_samples = self.pending.iter().map(|u| u.sample_count).sum();
        }
        true
    }

    fn participant_count(&self) -> usize {
        self.pending
            .iter()
            .map(|u| u.organization_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Combine pending updates into the global weights
    pub fn aggregate(&mut self) -> FederationResult<TensorMap> {
        let participants = self.participant_count();
        if participants < self.min_participants {
            return Err(FederationError::InsufficientParticipants {
                received: participants,
                required: self.min_participants,
            });
        }

        let aggregated = match self.method {
            AggregationMethod::FedAvg => self.fedavg(),
            AggregationMethod::FedProx { mu } => self.fedprox(mu),
        };

        for (key, delta) in aggregated {
            match self.global_weights.get_mut(&key) {
                Some(weights) => {
                    assert_same_shape(&key, weights, &delta);
                    *weights += &delta;
                }
                None => {
                    self.global_weights.insert(key, delta);
                }
            }
        }

        let metrics = self.averaged_metrics();
        if let Some(round) = self.current_round.as_mut() {
            round.status = RoundStatus::Completed;
            round.completed_at = Some(Utc::now());
            round.aggregated_metrics = metrics;
            tracing::info!(
                round_id = %round.round_id,
                participants = round.participating_orgs,
                samples = round.total_samples,
                "Aggregation round completed"
            );
        }

        self.deduplicate_fingerprints();
        Ok(self.global_weights.clone())
    }

    /// Sample-weighted mean of the pending gradients
    fn fedavg(&self) -> TensorMap {
        let total_samples: usize = self.pending.iter().map(|u| u.sample_count).sum();
        let total = total_samples.max(1) as f64;

        let mut aggregated = TensorMap::new();
        for update in &self.pending {
            let weight = update.sample_count as f64 / total;
            for (key, gradient) in &update.gradients {
                let weighted = gradient * weight;
                match aggregated.get_mut(key) {
                    Some(acc) => {
                        assert_same_shape(key, acc, &weighted);
                        *acc += &weighted;
                    }
                    None => {
                        aggregated.insert(key.clone(), weighted);
                    }
                }
            }
        }
        aggregated
    }

    /// FedAvg plus `mu * (global - avg)` for tensors the global model has
    fn fedprox(&self, mu: f64) -> TensorMap {
        let mut aggregated = self.fedavg();
        for (key, value) in aggregated.iter_mut() {
            if let Some(global) = self.global_weights.get(key) {
                assert_same_shape(key, global, value);
                let proximal = (global - &*value) * mu;
                *value += &proximal;
            }
        }
        aggregated
    }

    /// Mean of each metric over the updates that reported it
    fn averaged_metrics(&self) -> BTreeMap<String, f64> {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for update in &self.pending {
            for (name, value) in &update.local_metrics {
                let entry = sums.entry(name.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(name, (sum, count))| (name, sum / count as f64))
            .collect()
    }

    /// Keep the first record per fingerprint id
    fn deduplicate_fingerprints(&mut self) {
        let mut seen = HashSet::new();
        self.global_fingerprints.retain(|fp| {
            let id = fp
                .fingerprint_id
                .clone()
                .unwrap_or_else(|| fingerprint_id(&fp.pattern_type, &fp.feature_signature));
            seen.insert(id)
        });
    }

    pub fn global_weights(&self) -> &TensorMap {
        &self.global_weights
    }

    pub fn global_fingerprints(&self) -> &[FingerprintRecord] {
        &self.global_fingerprints
    }

    pub fn round_status(&self) -> Option<&AggregationRound> {
        self.current_round.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot for distribution: version `v{round}.0`, newest fingerprints only
    pub fn create_global_update(&self) -> GlobalUpdate {
        let now = Utc::now();
        let skip = self
            .global_fingerprints
            .len()
            .saturating_sub(GLOBAL_FINGERPRINT_LIMIT);

        GlobalUpdate {
            update_id: format!("global-{}", now.format("%Y%m%d%H%M%S")),
            model_version: format!("v{}.0", self.round_counter),
            timestamp: now,
            aggregated_weights: self.global_weights.clone(),
            global_metrics: self
                .current_round
                .as_ref()
                .map(|r| r.aggregated_metrics.clone())
                .unwrap_or_default(),
            participating_orgs: self
                .current_round
                .as_ref()
                .map_or(0, |r| r.participating_orgs),
            new_fingerprints: self.global_fingerprints[skip..].to_vec(),
        }
    }

    pub fn set_initial_weights(&mut self, weights: TensorMap) {
        self.global_weights = weights;
    }
}
