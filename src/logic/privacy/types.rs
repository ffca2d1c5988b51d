//! Privacy Types
//!
//! Budget accounting and mechanism selection. No noise logic here.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::FederationError;

// ============================================================================
// NOISE MECHANISM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMechanism {
    /// (epsilon, delta)-DP, L2 sensitivity
    Gaussian,
    /// epsilon-DP, consumes no delta
    Laplacian,
}

impl NoiseMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseMechanism::Gaussian => "gaussian",
            NoiseMechanism::Laplacian => "laplacian",
        }
    }

    /// Delta actually spent by one query at the requested delta
    pub fn delta_cost(&self, delta: f64) -> f64 {
        match self {
            NoiseMechanism::Gaussian => delta,
            NoiseMechanism::Laplacian => 0.0,
        }
    }
}

impl std::fmt::Display for NoiseMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NoiseMechanism {
    type Err = FederationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gaussian" => Ok(NoiseMechanism::Gaussian),
            "laplacian" | "laplace" => Ok(NoiseMechanism::Laplacian),
            other => Err(FederationError::InvalidPrivacyParameter(format!(
                "unknown noise mechanism '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// PRIVACY BUDGET
// ============================================================================

/// Relative slack for float accumulation when comparing against the total
const BUDGET_TOLERANCE: f64 = 1e-9;

/// Privacy budget owned by one engine instance
///
/// consumed <= total always holds; only `reset` un-consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    pub total_epsilon: f64,
    pub total_delta: f64,
    pub consumed_epsilon: f64,
    pub consumed_delta: f64,
    pub query_count: u64,
}

impl PrivacyBudget {
    pub fn new(total_epsilon: f64, total_delta: f64) -> Self {
        Self {
            total_epsilon,
            total_delta,
            consumed_epsilon: 0.0,
            consumed_delta: 0.0,
            query_count: 0,
        }
    }

    pub fn remaining_epsilon(&self) -> f64 {
        (self.total_epsilon - self.consumed_epsilon).max(0.0)
    }

    pub fn remaining_delta(&self) -> f64 {
        (self.total_delta - self.consumed_delta).max(0.0)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_epsilon() <= self.total_epsilon * BUDGET_TOLERANCE
            || self.remaining_delta() <= self.total_delta * BUDGET_TOLERANCE
    }

    /// Whether a query costing (epsilon, delta) fits in what is left
    pub fn can_afford(&self, epsilon: f64, delta: f64) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let eps_slack = self.total_epsilon * BUDGET_TOLERANCE;
        let delta_slack = self.total_delta * BUDGET_TOLERANCE;
        self.consumed_epsilon + epsilon <= self.total_epsilon + eps_slack
            && self.consumed_delta + delta <= self.total_delta + delta_slack
    }

    /// Caller must have checked `can_afford` under the same lock
    pub(crate) fn consume(&mut self, epsilon: f64, delta: f64) {
        self.consumed_epsilon += epsilon;
        self.consumed_delta += delta;
        self.query_count += 1;
    }

    pub(crate) fn reset(&mut self) {
        self.consumed_epsilon = 0.0;
        self.consumed_delta = 0.0;
        self.query_count = 0;
    }
}
