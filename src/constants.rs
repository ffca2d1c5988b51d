//! Central Configuration Constants
//!
//! Single source of truth for all federation defaults.

/// Default federation server URL
///
/// Fallback when `FEDERATION_ENDPOINT` is not set.
/// For development: http://localhost:8080
pub const DEFAULT_FEDERATION_URL: &str = "http://localhost:8080";

// ============================================================================
// TRAINING
// ============================================================================

/// Local epochs per training round
pub const DEFAULT_LOCAL_EPOCHS: u32 = 5;

/// Updates trained on fewer samples are never submitted
pub const DEFAULT_MIN_SAMPLES_FOR_UPDATE: usize = 100;

/// Hours between two contributions
pub const DEFAULT_CONTRIBUTION_FREQUENCY_HOURS: u64 = 24;

/// Model version reported before any global update was applied
pub const INITIAL_MODEL_VERSION: &str = "v1";

/// Training samples inspected for fingerprint extraction per round
pub const FINGERPRINT_SAMPLE_LIMIT: usize = 10;

/// Pattern type of fingerprints extracted from positive training samples
pub const HIGH_RISK_PATTERN: &str = "high_risk";

/// Failures kept in the contribution status
pub const MAX_STATUS_ERRORS: usize = 10;

// ============================================================================
// PRIVACY
// ============================================================================

pub const DEFAULT_EPSILON: f64 = 1.0;
pub const DEFAULT_DELTA: f64 = 1e-5;
pub const DEFAULT_MAX_GRAD_NORM: f64 = 1.0;

/// Budget allowance = this many queries at the configured (epsilon, delta)
pub const BUDGET_QUERY_ALLOWANCE: f64 = 100.0;

// ============================================================================
// SECURE AGGREGATION
// ============================================================================

/// Fixed-point scale used to turn float gradients into integer shares
pub const FIXED_POINT_SCALE: f64 = 1000.0;

/// Random shares are drawn uniformly from [-SHARE_BOUND, SHARE_BOUND)
pub const SHARE_BOUND: i64 = 1000;

// ============================================================================
// FINGERPRINTS
// ============================================================================

/// Feature dimensions that make up a signature
pub const SIGNATURE_DIMENSIONS: usize = 10;

/// Above this value a feature is bucketed as "high"
pub const HIGH_BUCKET_THRESHOLD: f64 = 0.7;

/// Above this value a feature is bucketed as "med"
pub const MED_BUCKET_THRESHOLD: f64 = 0.3;

/// Fuzzy matches need similarity strictly above this
pub const MATCH_SIMILARITY_THRESHOLD: f64 = 0.8;

pub const DEFAULT_TOP_K: usize = 5;

/// Upper bound for source_count
pub const SOURCE_COUNT_CAP: u32 = 1000;

/// Confidence of a freshly inserted fingerprint
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// Confidence weights (observations 30%, sources 50%, recency 20%)
pub const OBSERVATION_WEIGHT: f64 = 0.3;
pub const SOURCE_WEIGHT: f64 = 0.5;
pub const RECENCY_WEIGHT: f64 = 0.2;

/// Observation count at which the observation factor saturates
pub const OBSERVATION_SATURATION: f64 = 100.0;

/// Source count at which the source factor saturates
pub const SOURCE_SATURATION: f64 = 10.0;

/// Age (days) at which the recency factor reaches zero
pub const RECENCY_HORIZON_DAYS: f64 = 365.0;

/// Default retention: records unseen for a year are pruned
pub const DEFAULT_RETENTION_DAYS: i64 = 365;

/// Default retention: registry capacity
pub const DEFAULT_MAX_FINGERPRINTS: usize = 10_000;

// ============================================================================
// AGGREGATION (server side)
// ============================================================================

pub const DEFAULT_MIN_PARTICIPANTS: usize = 3;
pub const DEFAULT_STALENESS_HOURS: i64 = 24;
pub const DEFAULT_FEDPROX_MU: f64 = 0.01;

/// Fingerprints shipped with one global update
pub const GLOBAL_FINGERPRINT_LIMIT: usize = 100;

// ============================================================================
// TRANSPORT
// ============================================================================

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Round id the server reports before any aggregation happened
pub const NO_GLOBAL_ROUND: &str = "none";
