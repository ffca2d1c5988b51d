//! Threat Fingerprint Store
//!
//! Registry of anonymized signatures shared across the federation.
//! All mutations go through one write lock so counters are never lost.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::signature::{anonymize_source, compute_confidence, fingerprint_id, quantize, similarity};
use super::types::{
    FingerprintRecord, RetentionPolicy, Severity, Signature, SignatureBucket, ThreatFingerprint,
};
use crate::constants::{INITIAL_CONFIDENCE, MATCH_SIMILARITY_THRESHOLD, SOURCE_COUNT_CAP};

/// Source label for records arriving through the federation without one
const FEDERATION_SOURCE: &str = "federation";

#[derive(Default)]
struct StoreInner {
    fingerprints: HashMap<String, ThreatFingerprint>,
    /// signature -> ids of every pattern type sharing it
    signature_index: HashMap<Signature, BTreeSet<String>>,
}

impl StoreInner {
    fn remove(&mut self, id: &str) {
        if let Some(fp) = self.fingerprints.remove(id) {
            if let Some(ids) = self.signature_index.get_mut(&fp.feature_signature) {
                ids.remove(id);
                if ids.is_empty() {
                    self.signature_index.remove(&fp.feature_signature);
                }
            }
        }
    }

    fn records_for(&self, ids: &BTreeSet<String>) -> Vec<ThreatFingerprint> {
        ids.iter()
            .filter_map(|id| self.fingerprints.get(id))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct ThreatFingerprintStore {
    inner: RwLock<StoreInner>,
    retention: RetentionPolicy,
}

impl ThreatFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Add a new fingerprint or record another observation of a known one
    pub fn add_fingerprint(
        &self,
        pattern_type: &str,
        signature: &[SignatureBucket],
        severity: Severity,
        source_id: &str,
    ) -> ThreatFingerprint {
        self.add_fingerprint_at(pattern_type, signature, severity, source_id, Utc::now())
    }

    /// `add_fingerprint` with an explicit observation time
    pub fn add_fingerprint_at(
        &self,
        pattern_type: &str,
        signature: &[SignatureBucket],
        severity: Severity,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> ThreatFingerprint {
        let id = fingerprint_id(pattern_type, signature);
        let mut inner = self.inner.write();

        if let Some(fp) = inner.fingerprints.get_mut(&id) {
            fp.last_seen = now;
            fp.observation_count += 1;
            fp.source_count = (fp.source_count + 1).min(SOURCE_COUNT_CAP);
            fp.confidence = compute_confidence(fp.observation_count, fp.source_count, 0);
            tracing::debug!(
                fingerprint_id = %id,
                observations = fp.observation_count,
                confidence = fp.confidence,
                "Fingerprint observation recorded"
            );
            return fp.clone();
        }

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            "first_source".to_string(),
            serde_json::Value::String(anonymize_source(source_id)),
        );

        let fp = ThreatFingerprint {
            fingerprint_id: id.clone(),
            pattern_type: pattern_type.to_string(),
            feature_signature: signature.to_vec(),
            severity,
            first_seen: now,
            last_seen: now,
            observation_count: 1,
            source_count: 1,
            confidence: INITIAL_CONFIDENCE,
            metadata,
        };

        inner
            .signature_index
            .entry(fp.feature_signature.clone())
            .or_default()
            .insert(id.clone());
        inner.fingerprints.insert(id.clone(), fp.clone());
        tracing::debug!(fingerprint_id = %id, pattern_type, "Fingerprint added");

        fp
    }

    /// Exact signature hit (single best record), otherwise fuzzy matches
    /// with similarity > 0.8, most similar first
    pub fn find_matches(&self, features: &[f64], top_k: usize) -> Vec<ThreatFingerprint> {
        if top_k == 0 {
            return Vec::new();
        }

        let signature = quantize(features);
        let inner = self.inner.read();

        if let Some(ids) = inner.signature_index.get(&signature) {
            let best = inner
                .records_for(ids)
                .into_iter()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
            return best.into_iter().collect();
        }

        let mut scored: Vec<(f64, ThreatFingerprint)> = inner
            .signature_index
            .iter()
            .filter_map(|(sig, ids)| {
                let score = similarity(&signature, sig);
                (score > MATCH_SIMILARITY_THRESHOLD).then_some((score, ids))
            })
            .flat_map(|(score, ids)| inner.records_for(ids).into_iter().map(move |fp| (score, fp)))
            .collect();

        scored.sort_by(|(sa, fa), (sb, fb)| {
            sb.total_cmp(sa)
                .then_with(|| fb.confidence.total_cmp(&fa.confidence))
                .then_with(|| fa.fingerprint_id.cmp(&fb.fingerprint_id))
        });
        scored.truncate(top_k);
        scored.into_iter().map(|(_, fp)| fp).collect()
    }

    /// Every record (any pattern type) whose signature equals the quantized features
    pub fn exact_matches(&self, features: &[f64]) -> Vec<ThreatFingerprint> {
        let signature = quantize(features);
        let inner = self.inner.read();
        inner
            .signature_index
            .get(&signature)
            .map(|ids| inner.records_for(ids))
            .unwrap_or_default()
    }

    pub fn get_fingerprint(&self, fingerprint_id: &str) -> Option<ThreatFingerprint> {
        self.inner.read().fingerprints.get(fingerprint_id).cloned()
    }

    /// Filtered listing, highest confidence first
    pub fn list_fingerprints(
        &self,
        pattern_type: Option<&str>,
        min_confidence: f64,
    ) -> Vec<ThreatFingerprint> {
        let mut results: Vec<ThreatFingerprint> = self
            .inner
            .read()
            .fingerprints
            .values()
            .filter(|fp| pattern_type.map_or(true, |p| fp.pattern_type == p))
            .filter(|fp| fp.confidence >= min_confidence)
            .cloned()
            .collect();

        results.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        results
    }

    pub fn len(&self) -> usize {
        self.inner.read().fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply add/update per record; returns how many were processed
    pub fn import_fingerprints(&self, records: &[FingerprintRecord]) -> usize {
        let mut count = 0;
        for record in records {
            let source = record.source.as_deref().unwrap_or(FEDERATION_SOURCE);
            self.add_fingerprint(
                &record.pattern_type,
                &record.feature_signature,
                record.severity,
                source,
            );
            count += 1;
        }
        tracing::debug!(count, total = self.len(), "Fingerprints imported");
        count
    }

    pub fn export_fingerprints(&self) -> Vec<ThreatFingerprint> {
        self.inner.read().fingerprints.values().cloned().collect()
    }

    /// Enforce the retention policy; returns the number of evicted records
    ///
    /// Capacity eviction ranks by age-adjusted confidence. Stored confidence
    /// only changes on repeat observation, never here.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let before = inner.fingerprints.len();

        if let Some(max_age_days) = self.retention.max_age_days {
            let cutoff = now - Duration::days(max_age_days);
            let expired: Vec<String> = inner
                .fingerprints
                .values()
                .filter(|fp| fp.last_seen < cutoff)
                .map(|fp| fp.fingerprint_id.clone())
                .collect();
            for id in expired {
                inner.remove(&id);
            }
        }

        if let Some(capacity) = self.retention.max_fingerprints {
            let excess = inner.fingerprints.len().saturating_sub(capacity);
            if excess > 0 {
                let mut ranked: Vec<(f64, DateTime<Utc>, String)> = inner
                    .fingerprints
                    .values()
                    .map(|fp| {
                        let age_days = (now - fp.last_seen).num_days();
                        let rank =
                            compute_confidence(fp.observation_count, fp.source_count, age_days);
                        (rank, fp.last_seen, fp.fingerprint_id.clone())
                    })
                    .collect();
                ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                for (_, _, id) in ranked.into_iter().take(excess) {
                    inner.remove(&id);
                }
            }
        }

        let evicted = before - inner.fingerprints.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = inner.fingerprints.len(), "Fingerprint registry pruned");
        }
        evicted
    }
}
