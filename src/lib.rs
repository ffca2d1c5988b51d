//! Shield Federation - Privacy Layer for Federated Risk Models
//!
//! Organizations train locally, submit privacy-protected model updates and
//! receive an aggregated global update together with anonymized threat
//! fingerprints contributed by other participants.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    FEDERATION CLIENT                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  LocalModel ──► gradients ──► DifferentialPrivacy (clip+noise)│
//! │                                   │                          │
//! │                                   ▼                          │
//! │                        SecureAggregation (mask/share)        │
//! │                                   │                          │
//! │  training data ──► fingerprints   ▼                          │
//! │        │                    ModelUpdate ──► transport ──►    │
//! │        ▼                                                     │
//! │  ThreatFingerprintStore ◄── GlobalUpdate ◄── transport ◄──   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logic;

pub use config::FederationConfig;
pub use error::{FederationError, FederationResult, TransportError};

pub use logic::aggregator::{AggregationMethod, AggregationRound, FederatedAggregator, RoundStatus};
pub use logic::federation::{
    run_contribution_loop, ContributionStatus, FederationClient, FederationTransport,
    GlobalUpdate, HttpTransport, LocalModel, MaskingContext, ModelKind, ModelUpdate,
    ModelWeights, RetryPolicy, TrainingData,
};
pub use logic::fingerprint::{
    FingerprintRecord, RetentionPolicy, Severity, Signature, SignatureBucket,
    ThreatFingerprint, ThreatFingerprintStore,
};
pub use logic::privacy::{DifferentialPrivacy, NoiseMechanism, PrivacyBudget};
pub use logic::secure_agg::{PartyShares, SecureAggregation};
pub use logic::tensor::TensorMap;
