//! Secure Aggregation Module
//!
//! Two interoperable ways to hide individual gradients from the aggregator:
//! - `shares`: additive secret sharing (fixed point, threshold-gated recovery)
//! - `masking`: pairwise antisymmetric masks that cancel in the sum

pub mod shares;
pub mod masking;


pub use shares::{reconstruct, PartyShares, SecureAggregation, ShareMap};
pub use masking::{generate_mask, masked_aggregation, sum_masked, MaskingContext};
