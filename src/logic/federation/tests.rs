use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use ndarray::{arr1, Array1, Array2, ArrayD};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::*;
use crate::config::FederationConfig;
use crate::error::{FederationError, FederationResult, TransportError};
use crate::logic::fingerprint::{fingerprint_id, quantize, FingerprintRecord, Severity, SignatureBucket};
use crate::logic::privacy::DifferentialPrivacy;
use crate::logic::secure_agg::sum_masked;

// ============================================================================
// FIXTURES
// ============================================================================

/// Logistic regression trained with full-batch gradient descent
#[derive(Clone)]
struct Logistic {
    coef: Array1<f64>,
    intercept: f64,
    learning_rate: f64,
}

impl Logistic {
    fn new(dim: usize) -> Self {
        Self {
            coef: Array1::zeros(dim),
            intercept: 0.0,
            learning_rate: 0.5,
        }
    }

    fn probabilities(&self, features: &Array2<f64>) -> Array1<f64> {
        (features.dot(&self.coef) + self.intercept).mapv(|z| 1.0 / (1.0 + (-z).exp()))
    }
}

impl LocalModel for Logistic {
    fn linear_coefficients(&self) -> Option<(ArrayD<f64>, Option<ArrayD<f64>>)> {
        Some((self.coef.clone().into_dyn(), Some(arr1(&[self.intercept]).into_dyn())))
    }

    fn train_epoch(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> FederationResult<()> {
        let n = features.nrows() as f64;
        let error = self.probabilities(features) - labels;
        let step = features.t().dot(&error) * (self.learning_rate / n);
        self.coef = &self.coef - &step;
        self.intercept -= self.learning_rate * error.sum() / n;
        Ok(())
    }

    fn score(&self, features: &Array2<f64>, labels: &Array1<f64>) -> f64 {
        let probs = self.probabilities(features);
        let correct = probs
            .iter()
            .zip(labels)
            .filter(|(p, y)| (**p > 0.5) == (**y == 1.0))
            .count();
        correct as f64 / labels.len() as f64
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Option<Array1<f64>> {
        Some(self.probabilities(features))
    }
}

/// Model without any weight accessor
struct Opaque;

impl LocalModel for Opaque {
    fn train_epoch(&mut self, _: &Array2<f64>, _: &Array1<f64>) -> FederationResult<()> {
        Ok(())
    }

    fn score(&self, _: &Array2<f64>, _: &Array1<f64>) -> f64 {
        0.0
    }
}

#[derive(Default)]
struct ServerState {
    submits: AtomicUsize,
    fetches: AtomicUsize,
    submitted: Mutex<Vec<ModelUpdate>>,
    global: Mutex<Option<GlobalUpdate>>,
    reject_with: Mutex<Option<String>>,
}

/// In-memory federation server that counts every call
#[derive(Clone, Default)]
struct FakeTransport {
    state: Arc<ServerState>,
}

impl FederationTransport for FakeTransport {
    async fn submit(&self, update: &ModelUpdate) -> Result<bool, TransportError> {
        self.state.submits.fetch_add(1, Ordering::SeqCst);
        let rejection = self.state.reject_with.lock().clone();
        if let Some(reason) = rejection {
            return Err(TransportError::Rejected(reason));
        }
        self.state.submitted.lock().push(update.clone());
        Ok(true)
    }

    async fn fetch_global(&self) -> Result<Option<GlobalUpdate>, TransportError> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.global.lock().clone())
    }
}

fn dataset(n: usize) -> TrainingData {
    let features = Array2::from_shape_fn((n, 10), |(i, j)| ((i * 7 + j * 3) % 10) as f64 / 10.0);
    let labels = Array1::from_shape_fn(n, |i| if features[[i, 0]] > 0.5 { 1.0 } else { 0.0 });
    TrainingData::new(features, labels)
}

fn config(min_samples: usize, secure_aggregation: bool) -> FederationConfig {
    let mut config = FederationConfig::new("org-test", "http://localhost:8080");
    config.local_epochs = 3;
    config.min_samples_for_update = min_samples;
    config.enable_secure_aggregation = secure_aggregation;
    config
}

fn client(config: FederationConfig) -> (FederationClient<Logistic, FakeTransport>, FakeTransport) {
    let transport = FakeTransport::default();
    let client = FederationClient::new(config, Logistic::new(10), transport.clone());
    (client, transport)
}

fn global_update(version: &str, fingerprints: Vec<FingerprintRecord>) -> GlobalUpdate {
    GlobalUpdate {
        update_id: "round-000002".to_string(),
        model_version: version.to_string(),
        timestamp: Utc::now(),
        aggregated_weights: BTreeMap::new(),
        global_metrics: BTreeMap::from([("accuracy".to_string(), 0.85)]),
        participating_orgs: 15,
        new_fingerprints: fingerprints,
    }
}

// ============================================================================
// TRAINING
// ============================================================================

#[tokio::test]
async fn test_undersized_update_never_reaches_network() {
    let (client, transport) = client(config(100, true));

    let update = client.train_local(&dataset(50), None).unwrap();
    assert_eq!(update.sample_count, 50);

    // No masking context is set either: the size check comes first
    let accepted = client.submit_update(update).await.unwrap();
    assert!(!accepted);
    assert_eq!(transport.state.submits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_train_local_reports_weight_delta() {
    let (client, _) = client(config(100, false));
    let data = dataset(120);

    let first = client.train_local(&data, None).unwrap();
    assert_eq!(first.update_id, "org-test-000001");
    assert_eq!(first.organization_id, "org-test");
    assert_eq!(first.model_version, "v1");
    assert_eq!(first.sample_count, 120);
    assert!(first.local_metrics.is_empty());
    assert_eq!(first.gradients.keys().collect::<Vec<_>>(), vec!["coef", "intercept"]);

    // Starting from zero weights, the delta equals the trained weights
    let mut reference = Logistic::new(10);
    let labels = data.labels.as_ref().unwrap();
    for _ in 0..3 {
        reference.train_epoch(&data.features, labels).unwrap();
    }
    let coef = &first.gradients["coef"];
    assert_eq!(coef.shape(), &[10]);
    for (delta, expected) in coef.iter().zip(reference.coef.iter()) {
        assert!((delta - expected).abs() < 1e-12);
    }

    let second = client.train_local(&data, None).unwrap();
    assert_eq!(second.update_id, "org-test-000002");
}

#[test]
fn test_validation_metrics() {
    let (client, _) = client(config(100, false));
    let update = client.train_local(&dataset(120), Some(&dataset(40))).unwrap();

    let accuracy = update.local_metrics["accuracy"];
    let auc = update.local_metrics["auc_roc"];
    assert!((0.0..=1.0).contains(&accuracy));
    assert!((0.0..=1.0).contains(&auc));
}

#[test]
fn test_missing_labels_fail_training() {
    let (client, _) = client(config(100, false));
    let data = TrainingData::unlabeled(dataset(120).features);

    assert!(matches!(
        client.train_local(&data, None),
        Err(FederationError::Training(_))
    ));
}

#[test]
fn test_unsupported_model_fails_training() {
    let client = FederationClient::new(config(100, false), Opaque, FakeTransport::default());

    assert!(matches!(
        client.train_local(&dataset(120), None),
        Err(FederationError::UnsupportedModel)
    ));
}

#[test]
fn test_fingerprints_from_positive_samples() {
    let (client, _) = client(config(100, false));
    let data = dataset(120);

    let update = client.train_local(&data, None).unwrap();

    // Rows 1, 4, 7 and 8 are the positives among the first ten
    assert_eq!(update.fingerprints.len(), 4);
    let row = data.features.row(1).to_vec();
    let expected = quantize(&row);
    let first = &update.fingerprints[0];
    assert_eq!(first.pattern_type, "high_risk");
    assert_eq!(first.feature_signature, expected);
    assert_eq!(first.severity, Severity::High);
    assert_eq!(first.source.as_deref(), Some("org***"));
    assert_eq!(
        first.fingerprint_id.as_deref(),
        Some(fingerprint_id("high_risk", &expected).as_str())
    );
}

// ============================================================================
// PRIVACY
// ============================================================================

#[test]
fn test_privacy_engine_consumes_budget() {
    let engine = Arc::new(DifferentialPrivacy::new(1.0, 1e-5).unwrap().with_seed(7));
    let (client, _) = client(config(100, false));
    let client = client.with_privacy_engine(Arc::clone(&engine));

    let update = client.train_local(&dataset(120), None).unwrap();
    assert_eq!(update.gradients.len(), 2);

    let budget = engine.budget_status();
    assert_eq!(budget.query_count, 1);
    assert!((budget.consumed_epsilon - 1.0).abs() < 1e-12);
    assert!((budget.consumed_delta - 1e-5).abs() < 1e-15);
}

#[test]
fn test_exhausted_budget_fails_round() {
    // Allowance is 100 x 0.01 = 1.0, exactly one round at epsilon 1.0
    let engine = Arc::new(DifferentialPrivacy::new(0.01, 1e-5).unwrap().with_seed(7));
    let (client, _) = client(config(100, false));
    let client = client.with_privacy_engine(Arc::clone(&engine));

    client.train_local(&dataset(120), None).unwrap();
    let before = engine.budget_status();

    let result = client.train_local(&dataset(120), None);
    assert!(matches!(result, Err(FederationError::BudgetExhausted { .. })));
    assert_eq!(engine.budget_status(), before);
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[tokio::test]
async fn test_secure_aggregation_requires_masking_context() {
    let (client, transport) = client(config(100, true));
    let update = client.train_local(&dataset(120), None).unwrap();

    let result = client.submit_update(update).await;
    assert!(matches!(result, Err(FederationError::MissingMaskingContext)));
    assert_eq!(transport.state.submits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_masked_updates_cancel_in_sum() {
    let transport = FakeTransport::default();
    let party_a = FederationClient::new(config(100, true), Logistic::new(10), transport.clone())
        .with_masking_context(MaskingContext::new(0).with_pair(1, 99));
    let party_b = FederationClient::new(config(100, true), Logistic::new(10), transport.clone());
    party_b.set_masking_context(MaskingContext::new(1).with_pair(0, 99));

    let update_a = party_a.train_local(&dataset(120), None).unwrap();
    let update_b = party_b.train_local(&dataset(150), None).unwrap();
    let originals = vec![update_a.gradients.clone(), update_b.gradients.clone()];

    assert!(party_a.submit_update(update_a).await.unwrap());
    assert!(party_b.submit_update(update_b).await.unwrap());

    let submitted: Vec<_> = transport
        .state
        .submitted
        .lock()
        .iter()
        .map(|u| u.gradients.clone())
        .collect();
    assert_ne!(submitted[0]["coef"], originals[0]["coef"]);

    let masked_sum = sum_masked(&submitted);
    let plain_sum = sum_masked(&originals);
    for (key, total) in &plain_sum {
        for (m, p) in masked_sum[key].iter().zip(total.iter()) {
            assert!((m - p).abs() < 1e-9, "{}: {} vs {}", key, m, p);
        }
    }
}

#[tokio::test]
async fn test_unmasked_submission_when_disabled() {
    let (client, transport) = client(config(100, false));
    let update = client.train_local(&dataset(120), None).unwrap();
    let original = update.gradients.clone();

    assert!(client.submit_update(update).await.unwrap());
    assert_eq!(transport.state.submitted.lock()[0].gradients, original);
}

#[test]
fn test_server_rejection_is_not_an_error() {
    let (client, transport) = client(config(100, false));
    *transport.state.reject_with.lock() = Some("No active aggregation round".to_string());

    let update = client.train_local(&dataset(120), None).unwrap();
    let accepted = tokio_test::block_on(client.submit_update(update)).unwrap();

    assert!(!accepted);
    assert_eq!(transport.state.submits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// GLOBAL UPDATES
// ============================================================================

#[tokio::test]
async fn test_no_global_update_available() {
    let (client, transport) = client(config(100, false));
    assert!(client.get_global_update().await.unwrap().is_none());
    assert_eq!(transport.state.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_apply_global_update() {
    let (client, transport) = client(config(100, false));
    let signature = vec![SignatureBucket::High; 10];
    let shared = FingerprintRecord {
        fingerprint_id: None,
        pattern_type: "high_risk".to_string(),
        feature_signature: signature.clone(),
        severity: Severity::Critical,
        source: Some("ban***".to_string()),
    };
    *transport.state.global.lock() = Some(global_update("v2.0", vec![shared]));

    let global = client.get_global_update().await.unwrap().unwrap();
    client.apply_global_update(&global);

    assert_eq!(client.model_version(), "v2.0");
    assert_eq!(client.fingerprint_store().len(), 1);

    let matches = client.check_fingerprint_match(&[0.9; 10]);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].fingerprint_id, fingerprint_id("high_risk", &signature));
    assert!(client.check_fingerprint_match(&[0.1; 10]).is_empty());

    let next = client.train_local(&dataset(120), None).unwrap();
    assert_eq!(next.model_version, "v2.0");
}

// ============================================================================
// CONTRIBUTION LOOP
// ============================================================================

#[tokio::test]
async fn test_contribution_loop_runs_until_shutdown() {
    let mut cfg = config(100, false);
    cfg.contribution_frequency_hours = 0;
    let (client, transport) = client(cfg);
    *transport.state.global.lock() = Some(global_update("v3.0", Vec::new()));
    let client = Arc::new(client);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut batches = 0;
    let next_batch = move || {
        batches += 1;
        if batches == 2 {
            let _ = shutdown_tx.send(true);
        }
        Some((dataset(120), Some(dataset(20))))
    };

    let status = run_contribution_loop(Arc::clone(&client), next_batch, shutdown_rx).await;

    assert_eq!(status.rounds_completed, 2);
    assert_eq!(status.updates_accepted, 2);
    assert_eq!(status.last_global_version.as_deref(), Some("v3.0"));
    assert!(status.errors.is_empty());
    assert_eq!(transport.state.submits.load(Ordering::SeqCst), 2);
    assert_eq!(transport.state.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(client.contribution_status().rounds_completed, 2);
}

#[tokio::test]
async fn test_contribution_loop_records_failures() {
    let mut cfg = config(100, true);
    cfg.contribution_frequency_hours = 0;
    let (client, transport) = client(cfg);
    let client = Arc::new(client);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let next_batch = move || {
        let _ = shutdown_tx.send(true);
        Some((dataset(120), None))
    };

    // Secure aggregation without masking seeds fails the round
    let status = run_contribution_loop(client, next_batch, shutdown_rx).await;

    assert_eq!(status.rounds_completed, 0);
    assert_eq!(status.errors.len(), 1);
    assert_eq!(transport.state.submits.load(Ordering::SeqCst), 0);
}
