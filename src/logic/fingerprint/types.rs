//! Fingerprint Types
//!
//! Data structures for anonymized threat signatures. No store logic here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_FINGERPRINTS, DEFAULT_RETENTION_DAYS};

// ============================================================================
// SIGNATURE
// ============================================================================

/// Categorical bucket of one feature dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureBucket {
    Low,
    Med,
    High,
}

impl SignatureBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureBucket::Low => "low",
            SignatureBucket::Med => "med",
            SignatureBucket::High => "high",
        }
    }
}

impl std::fmt::Display for SignatureBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ordered tuple of buckets
pub type Signature = Vec<SignatureBucket>;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

// ============================================================================
// THREAT FINGERPRINT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatFingerprint {
    /// First 16 hex chars of SHA-256 over (pattern_type, signature)
    pub fingerprint_id: String,
    pub pattern_type: String,
    pub feature_signature: Signature,
    pub severity: Severity,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub observation_count: u64,
    /// Reporting sources, capped
    pub source_count: u32,
    /// Always within [0, 1]
    pub confidence: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

// ============================================================================
// EXCHANGE RECORD
// ============================================================================

/// Wire record shared across organizations
///
/// Exported `ThreatFingerprint`s deserialize into this too; extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_id: Option<String>,
    #[serde(default = "unknown_pattern")]
    pub pattern_type: String,
    #[serde(default)]
    pub feature_signature: Signature,
    #[serde(default)]
    pub severity: Severity,
    /// Anonymized source ("abc***")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn unknown_pattern() -> String {
    "unknown".to_string()
}

impl From<&ThreatFingerprint> for FingerprintRecord {
    fn from(fp: &ThreatFingerprint) -> Self {
        Self {
            fingerprint_id: Some(fp.fingerprint_id.clone()),
            pattern_type: fp.pattern_type.clone(),
            feature_signature: fp.feature_signature.clone(),
            severity: fp.severity,
            source: None,
        }
    }
}

// ============================================================================
// RETENTION
// ============================================================================

/// How long and how many fingerprints the registry keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Records not seen for longer than this are pruned (None = keep forever)
    pub max_age_days: Option<i64>,
    /// Capacity; lowest-confidence records are evicted first (None = unbounded)
    pub max_fingerprints: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(DEFAULT_RETENTION_DAYS),
            max_fingerprints: Some(DEFAULT_MAX_FINGERPRINTS),
        }
    }
}

impl RetentionPolicy {
    /// Append-only registry
    pub fn unbounded() -> Self {
        Self {
            max_age_days: None,
            max_fingerprints: None,
        }
    }
}
