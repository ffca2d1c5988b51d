//! Federation Module - Organization Side of Federated Learning
//!
//! This module handles:
//! - Local training rounds and weight-delta updates
//! - Privacy protection (noise, pairwise masking) before submission
//! - Global update retrieval and fingerprint import
//! - The periodic contribution loop

pub mod model;
pub mod types;
pub mod metrics;
pub mod transport;
pub mod client;
pub mod contribution;

#[cfg(test)]
mod tests;

pub use model::{extract_weights, LocalModel, ModelKind, ModelWeights};
pub use types::{ContributionStatus, GlobalUpdate, ModelUpdate, TrainingData};
pub use metrics::{auc_roc, evaluate};
pub use transport::{FederationTransport, HttpTransport, RetryPolicy};
pub use client::FederationClient;
pub use contribution::{run_contribution_loop, ContributionBatch};

pub use crate::logic::secure_agg::MaskingContext;
