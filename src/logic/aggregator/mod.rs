//! Aggregator Module
//!
//! Server-side combination of organization updates (FedAvg, FedProx).

pub mod types;
pub mod rounds;


pub use types::{AggregationMethod, AggregationRound, RoundStatus};
pub use rounds::FederatedAggregator;
