//! Fingerprint Module
//!
//! Anonymized threat signatures exchanged between organizations.
//!
//! ## Structure
//! - `types`: ThreatFingerprint, FingerprintRecord, RetentionPolicy
//! - `signature`: quantization, ids, similarity, confidence
//! - `store`: ThreatFingerprintStore (synchronized registry)

pub mod types;
pub mod signature;
pub mod store;


pub use types::{
    FingerprintRecord, RetentionPolicy, Severity, Signature, SignatureBucket, ThreatFingerprint,
};
pub use signature::{anonymize_source, compute_confidence, fingerprint_id, quantize, similarity};
pub use store::ThreatFingerprintStore;
