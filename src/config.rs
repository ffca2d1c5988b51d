//! Configuration module

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{FederationError, FederationResult};

/// Per-session federation configuration
///
/// Supplied once when the client is built and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Organization identity
    pub organization_id: String,

    /// Federation server base URL
    pub federation_endpoint: String,

    /// Bearer key for the federation server
    #[serde(skip_serializing, default)]
    pub api_key: String,

    /// Local epochs per training round
    pub local_epochs: u32,

    /// Minimum samples before an update may be submitted
    pub min_samples_for_update: usize,

    /// Hours between contributions
    pub contribution_frequency_hours: u64,

    pub privacy_epsilon: f64,
    pub privacy_delta: f64,

    /// Mask gradients before they leave the process
    pub enable_secure_aggregation: bool,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Attempts after the first failed request
    pub max_retries: u32,

    /// First backoff delay, doubled on every retry
    pub retry_base_delay_ms: u64,
}

impl FederationConfig {
    pub fn new(organization_id: impl Into<String>, federation_endpoint: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            federation_endpoint: federation_endpoint.into(),
            api_key: String::new(),
            local_epochs: constants::DEFAULT_LOCAL_EPOCHS,
            min_samples_for_update: constants::DEFAULT_MIN_SAMPLES_FOR_UPDATE,
            contribution_frequency_hours: constants::DEFAULT_CONTRIBUTION_FREQUENCY_HOURS,
            privacy_epsilon: constants::DEFAULT_EPSILON,
            privacy_delta: constants::DEFAULT_DELTA,
            enable_secure_aggregation: true,
            request_timeout_secs: constants::DEFAULT_TIMEOUT_SECS,
            max_retries: constants::DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }

    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> FederationResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> FederationResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let organization_id = lookup("FEDERATION_ORG_ID")
            .ok_or_else(|| FederationError::Config("FEDERATION_ORG_ID is not set".to_string()))?;
        let endpoint = lookup("FEDERATION_ENDPOINT")
            .unwrap_or_else(|| constants::DEFAULT_FEDERATION_URL.to_string());

        let defaults = Self::new(organization_id, endpoint);

        let config = Self {
            api_key: lookup("FEDERATION_API_KEY").unwrap_or_default(),
            local_epochs: parsed(&lookup, "FEDERATION_LOCAL_EPOCHS")
                .unwrap_or(defaults.local_epochs),
            min_samples_for_update: parsed(&lookup, "FEDERATION_MIN_SAMPLES")
                .unwrap_or(defaults.min_samples_for_update),
            contribution_frequency_hours: parsed(&lookup, "FEDERATION_CONTRIBUTION_HOURS")
                .unwrap_or(defaults.contribution_frequency_hours),
            privacy_epsilon: parsed(&lookup, "FEDERATION_EPSILON")
                .unwrap_or(defaults.privacy_epsilon),
            privacy_delta: parsed(&lookup, "FEDERATION_DELTA")
                .unwrap_or(defaults.privacy_delta),
            enable_secure_aggregation: lookup("FEDERATION_SECURE_AGGREGATION")
                .map(|s| s.to_lowercase() != "false" && s != "0")
                .unwrap_or(defaults.enable_secure_aggregation),
            request_timeout_secs: parsed(&lookup, "FEDERATION_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout_secs),
            max_retries: parsed(&lookup, "FEDERATION_MAX_RETRIES")
                .unwrap_or(defaults.max_retries),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the privacy layer cannot honor
    pub fn validate(&self) -> FederationResult<()> {
        if self.organization_id.trim().is_empty() {
            return Err(FederationError::Config("organization_id is empty".to_string()));
        }
        if !(self.privacy_epsilon > 0.0) {
            return Err(FederationError::Config(format!(
                "privacy_epsilon must be > 0, got {}",
                self.privacy_epsilon
            )));
        }
        if !(self.privacy_delta > 0.0 && self.privacy_delta < 1.0) {
            return Err(FederationError::Config(format!(
                "privacy_delta must be in (0, 1), got {}",
                self.privacy_delta
            )));
        }
        if self.local_epochs == 0 {
            return Err(FederationError::Config("local_epochs must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Parse a looked-up value, treating malformed input as unset
fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
