//! Logic Module - Federation Privacy Engines
//!
//! - `privacy/` - Differential privacy (clipping, noise, budget)
//! - `secure_agg/` - Secret sharing and pairwise masking
//! - `fingerprint/` - Anonymized threat fingerprint registry
//! - `federation/` - Local update producer (client, transport, loop)
//! - `aggregator/` - Server-side round aggregation

pub mod tensor;

pub mod privacy;
pub mod secure_agg;
pub mod fingerprint;

pub mod federation;
pub mod aggregator;
