//! Federation Transport
//!
//! HTTP client for the federation server plus the trait the client is
//! generic over, so tests can swap in an in-memory server.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{GlobalUpdate, ModelUpdate};
use crate::config::FederationConfig;
use crate::constants::NO_GLOBAL_ROUND;
use crate::error::{FederationError, FederationResult, TransportError};
use crate::logic::fingerprint::FingerprintRecord;
use crate::logic::tensor::{from_wire, to_wire, WireTensor};

/// Network boundary of the federation client
pub trait FederationTransport: Send + Sync {
    /// Send one update; `Ok(true)` only when the server accepted it
    fn submit(
        &self,
        update: &ModelUpdate,
    ) -> impl Future<Output = Result<bool, TransportError>> + Send;

    /// Latest global aggregate, `None` if the server has none yet
    fn fetch_global(
        &self,
    ) -> impl Future<Output = Result<Option<GlobalUpdate>, TransportError>> + Send;
}

// ============================================================================
// RETRY
// ============================================================================

/// Bounded exponential backoff for retryable transport errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry, doubled every time
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: crate::constants::DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(crate::constants::DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &FederationConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_base_delay_ms))
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `request` until it succeeds, fails permanently or retries run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut request: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Federation request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SubmitUpdateRequest {
    pub org_id: String,
    pub update_id: String,
    pub model_version: String,
    pub sample_count: usize,
    pub model_weights: BTreeMap<String, WireTensor>,
    pub metrics: BTreeMap<String, f64>,
    pub fingerprints: Vec<FingerprintRecord>,
}

impl From<&ModelUpdate> for SubmitUpdateRequest {
    fn from(update: &ModelUpdate) -> Self {
        Self {
            org_id: update.organization_id.clone(),
            update_id: update.update_id.clone(),
            model_version: update.model_version.clone(),
            sample_count: update.sample_count,
            model_weights: to_wire(&update.gradients),
            metrics: update.local_metrics.clone(),
            fingerprints: update.fingerprints.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitUpdateResponse {
    pub accepted: bool,
    #[serde(default)]
    pub current_participants: Option<usize>,
    #[serde(default)]
    pub min_required: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GlobalModelResponse {
    pub round_id: String,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, WireTensor>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub fingerprints: Vec<FingerprintRecord>,
    #[serde(default)]
    pub participating_orgs: usize,
    pub timestamp: String,
}

impl GlobalModelResponse {
    /// `None` while the server has not aggregated any round
    pub fn into_global_update(self) -> Result<Option<GlobalUpdate>, TransportError> {
        if self.round_id == NO_GLOBAL_ROUND && self.weights.is_empty() {
            return Ok(None);
        }
        let aggregated_weights = from_wire(self.weights).map_err(TransportError::Parse)?;

        Ok(Some(GlobalUpdate {
            model_version: self.model_version.unwrap_or_else(|| self.round_id.clone()),
            update_id: self.round_id,
            timestamp: parse_timestamp(&self.timestamp),
            aggregated_weights,
            global_metrics: self.metrics,
            participating_orgs: self.participating_orgs,
            new_fingerprints: self.fingerprints,
        }))
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC; unparseable means now
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc()))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// HTTP TRANSPORT
// ============================================================================

/// reqwest-backed transport for the federation REST API
pub struct HttpTransport {
    endpoint: String,
    api_key: String,
    retry: RetryPolicy,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FederationConfig) -> FederationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FederationError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.federation_endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from_config(config),
            http_client,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    async fn post_update(&self, request: &SubmitUpdateRequest) -> Result<bool, TransportError> {
        let url = format!("{}/federation/updates/submit", self.endpoint);

        let response = self
            .authorized(self.http_client.post(&url))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: SubmitUpdateResponse = response
                .json()
                .await
                .map_err(|e| TransportError::Parse(e.to_string()))?;
            tracing::debug!(
                accepted = body.accepted,
                participants = ?body.current_participants,
                min_required = ?body.min_required,
                "Update submission answered"
            );
            Ok(body.accepted)
        } else if matches!(status.as_u16(), 400 | 409 | 422) {
            let reason = response.text().await.unwrap_or_default();
            Err(TransportError::Rejected(reason))
        } else {
            Err(TransportError::Server(status.as_u16()))
        }
    }

    async fn get_global(&self) -> Result<Option<GlobalUpdate>, TransportError> {
        let url = format!("{}/federation/models/global", self.endpoint);

        let response = self.authorized(self.http_client.get(&url)).send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::Server(status.as_u16()));
        }

        let body: GlobalModelResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;
        body.into_global_update()
    }
}

impl FederationTransport for HttpTransport {
    async fn submit(&self, update: &ModelUpdate) -> Result<bool, TransportError> {
        let request = SubmitUpdateRequest::from(update);
        self.retry.run("submit_update", || self.post_update(&request)).await
    }

    async fn fetch_global(&self) -> Result<Option<GlobalUpdate>, TransportError> {
        self.retry.run("fetch_global", || self.get_global()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = policy
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TransportError::Network("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let result: Result<(), _> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Server(503))
            })
            .await;

        assert!(matches!(result, Err(TransportError::Server(503))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_permanent_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);

        let result: Result<(), _> = tokio_test::block_on(policy.run("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Rejected("no active round".into()))
        }));

        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_global_response_conversion() {
        let json = r#"{
            "round_id": "round-000003",
            "model_version": "v3.0",
            "weights": {"coef": [0.1, -0.2], "layer_0": [[1.0, 0.0], [0.0, 1.0], [2.0, 2.0]]},
            "metrics": {"accuracy": 0.85},
            "fingerprints": [{"pattern_type": "high_risk", "feature_signature": ["low", "high"]}],
            "participating_orgs": 4,
            "timestamp": "2024-05-01T12:00:00"
        }"#;
        let response: GlobalModelResponse = serde_json::from_str(json).unwrap();
        let update = response.into_global_update().unwrap().unwrap();

        assert_eq!(update.update_id, "round-000003");
        assert_eq!(update.model_version, "v3.0");
        assert_eq!(update.aggregated_weights["coef"].len(), 2);
        assert_eq!(update.aggregated_weights["layer_0"].shape(), &[3, 2]);
        assert_eq!(update.participating_orgs, 4);
        assert_eq!(update.new_fingerprints.len(), 1);
        assert_eq!(update.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_empty_global_model_is_none() {
        let json = r#"{"round_id": "none", "weights": {}, "metrics": {}, "fingerprints": [],
                       "timestamp": "2024-05-01T12:00:00+00:00"}"#;
        let response: GlobalModelResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_global_update().unwrap().is_none());
    }

    #[test]
    fn test_ragged_global_weights_are_a_parse_error() {
        let json = r#"{"round_id": "round-000001", "weights": {"layer_0": [[1.0], [2.0, 3.0]]},
                       "timestamp": "2024-05-01T12:00:00+00:00"}"#;
        let response: GlobalModelResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(response.into_global_update(), Err(TransportError::Parse(_))));
    }

    #[test]
    fn test_submit_request_keeps_layer_shapes() {
        let mut gradients = crate::logic::tensor::TensorMap::new();
        gradients.insert(
            "layer_0".to_string(),
            ndarray::ArrayD::from_shape_vec(ndarray::IxDyn(&[2, 2]), vec![1.0, 2.0, 3.0, 4.0])
                .unwrap(),
        );
        let update = ModelUpdate {
            update_id: "org-1-000001".to_string(),
            organization_id: "org-1".to_string(),
            model_version: "v1".to_string(),
            timestamp: Utc::now(),
            gradients,
            sample_count: 200,
            local_metrics: BTreeMap::new(),
            fingerprints: Vec::new(),
        };

        let body = serde_json::to_value(SubmitUpdateRequest::from(&update)).unwrap();
        assert_eq!(body["model_weights"]["layer_0"], serde_json::json!([[1.0, 2.0], [3.0, 4.0]]));
    }

    #[test]
    fn test_http_transport_trims_endpoint() {
        let config = FederationConfig::new("org-1", "https://federation.example.org/");
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint(), "https://federation.example.org");
    }
}
