//! Aggregation Types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_FEDPROX_MU;

/// How pending updates are combined
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Sample-weighted mean of the updates
    #[default]
    FedAvg,
    /// FedAvg pulled toward the current global weights by `mu`
    FedProx { mu: f64 },
}

impl AggregationMethod {
    pub fn fedprox() -> Self {
        AggregationMethod::FedProx {
            mu: DEFAULT_FEDPROX_MU,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::FedAvg => "fedavg",
            AggregationMethod::FedProx { .. } => "fedprox",
        }
    }
}

impl std::fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AggregationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fedavg" => Ok(AggregationMethod::FedAvg),
            "fedprox" => Ok(AggregationMethod::fedprox()),
            other => Err(format!("unknown aggregation method: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    InProgress,
    Completed,
}

/// One collection + aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationRound {
    /// `round-{counter:06}`
    pub round_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Distinct organizations with an accepted update
    pub participating_orgs: usize,
    pub total_samples: usize,
    pub aggregated_metrics: BTreeMap<String, f64>,
    pub status: RoundStatus,
}
