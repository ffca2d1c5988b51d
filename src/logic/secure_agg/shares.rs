//! Additive Secret Sharing
//!
//! Gradients are scaled to fixed point (x1000) and split into `num_parties`
//! integer shares that sum exactly to the scaled value.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Zip};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{FIXED_POINT_SCALE, SHARE_BOUND};
use crate::error::{FederationError, FederationResult};
use crate::logic::tensor::{assert_same_shape, TensorMap};

/// Integer share per tensor key
pub type ShareMap = BTreeMap<String, ArrayD<i64>>;

/// Party index -> that party's share of every tensor
pub type PartyShares = BTreeMap<usize, ShareMap>;

pub struct SecureAggregation {
    num_parties: usize,
    threshold: usize,
    rng: Mutex<StdRng>,
}

impl SecureAggregation {
    /// Threshold defaults to a strict majority (num_parties / 2 + 1)
    pub fn new(num_parties: usize) -> FederationResult<Self> {
        if num_parties == 0 {
            return Err(FederationError::Config("num_parties must be > 0".to_string()));
        }
        Ok(Self {
            num_parties,
            threshold: num_parties / 2 + 1,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    pub fn with_threshold(mut self, threshold: usize) -> FederationResult<Self> {
        if threshold == 0 || threshold > self.num_parties {
            return Err(FederationError::Config(format!(
                "threshold must be in 1..={}, got {}",
                self.num_parties, threshold
            )));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        *self.rng.get_mut() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn num_parties(&self) -> usize {
        self.num_parties
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Split every gradient into one share per party
    pub fn create_shares(&self, gradients: &TensorMap, party_id: usize) -> PartyShares {
        let mut shares: PartyShares = (0..self.num_parties).map(|i| (i, ShareMap::new())).collect();
        let mut rng = self.rng.lock();

        for (key, grad) in gradients {
            let scaled = grad.mapv(to_fixed_point);
            let mut remainder = scaled;

            for party in 0..self.num_parties - 1 {
                let share = ArrayD::from_shape_simple_fn(grad.raw_dim(), || {
                    rng.gen_range(-SHARE_BOUND..SHARE_BOUND)
                });
                remainder = remainder - &share;
                if let Some(party_shares) = shares.get_mut(&party) {
                    party_shares.insert(key.clone(), share);
                }
            }

            if let Some(last) = shares.get_mut(&(self.num_parties - 1)) {
                last.insert(key.clone(), remainder);
            }
        }

        tracing::debug!(
            party_id,
            parties = self.num_parties,
            tensors = gradients.len(),
            "Secret shares created"
        );
        shares
    }

    /// Mean gradient of all contributing parties
    ///
    /// Each element of `all_party_shares` is the full share set one party produced.
    pub fn aggregate_shares(&self, all_party_shares: &[PartyShares]) -> FederationResult<TensorMap> {
        let contributors = all_party_shares.len();
        if contributors < self.threshold {
            return Err(FederationError::InsufficientShares {
                received: contributors,
                threshold: self.threshold,
            });
        }

        let sums = sum_shares(all_party_shares.iter());
        let divisor = FIXED_POINT_SCALE * contributors as f64;

        tracing::debug!(contributors, threshold = self.threshold, "Shares aggregated");
        Ok(sums
            .into_iter()
            .map(|(key, sum)| (key, sum.mapv(|v| v as f64 / divisor)))
            .collect())
    }
}

impl std::fmt::Debug for SecureAggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureAggregation")
            .field("num_parties", &self.num_parties)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Recover one party's gradients from its complete share set
pub fn reconstruct(shares: &PartyShares) -> TensorMap {
    sum_shares(std::iter::once(shares))
        .into_iter()
        .map(|(key, sum)| (key, sum.mapv(|v| v as f64 / FIXED_POINT_SCALE)))
        .collect()
}

fn to_fixed_point(value: f64) -> i64 {
    (value * FIXED_POINT_SCALE).round() as i64
}

/// Element-wise sum over every party index and every contribution, per key
fn sum_shares<'a, I>(contributions: I) -> ShareMap
where
    I: Iterator<Item = &'a PartyShares>,
{
    let mut sums = ShareMap::new();
    for party_shares in contributions {
        for share_map in party_shares.values() {
            for (key, share) in share_map {
                match sums.get_mut(key) {
                    Some(acc) => {
                        assert_same_shape(key, acc, share);
                        Zip::from(acc).and(share).for_each(|a, &s| *a += s);
                    }
                    None => {
                        sums.insert(key.clone(), share.clone());
                    }
                }
            }
        }
    }
    sums
}
