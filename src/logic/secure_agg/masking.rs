//! Pairwise Masking
//!
//! Every pair of parties shares a seed. The lower party id adds the mask,
//! the higher one subtracts it, so all masks cancel in the global sum.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logic::tensor::{assert_same_shape, TensorMap};

/// This party's id plus the seed agreed with every counterpart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingContext {
    pub party_id: usize,
    /// counterpart party id -> shared seed
    pub pair_seeds: BTreeMap<usize, u64>,
}

impl MaskingContext {
    pub fn new(party_id: usize) -> Self {
        Self {
            party_id,
            pair_seeds: BTreeMap::new(),
        }
    }

    pub fn with_pair(mut self, other_party: usize, seed: u64) -> Self {
        self.pair_seeds.insert(other_party, seed);
        self
    }
}

/// Deterministic mask, antisymmetric in party order: mask(i, j) == -mask(j, i)
pub fn generate_mask(shape: &[usize], party_i: usize, party_j: usize, seed: u64) -> ArrayD<f64> {
    if party_i == party_j {
        return ArrayD::zeros(IxDyn(shape));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mask = ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.sample::<f64, _>(StandardNormal));

    if party_i < party_j {
        mask
    } else {
        -mask
    }
}

/// Add one mask per counterpart to every gradient
pub fn masked_aggregation(
    gradients: &TensorMap,
    party_id: usize,
    seeds: &BTreeMap<usize, u64>,
) -> TensorMap {
    gradients
        .iter()
        .map(|(key, grad)| {
            let mut masked = grad.clone();
            for (&other, &seed) in seeds {
                let mask = generate_mask(grad.shape(), party_id, other, tensor_seed(seed, key));
                masked += &mask;
            }
            (key.clone(), masked)
        })
        .collect()
}

/// Sum masked contributions from all parties; masks cancel pairwise
pub fn sum_masked(contributions: &[TensorMap]) -> TensorMap {
    let mut total = TensorMap::new();
    for contribution in contributions {
        for (key, tensor) in contribution {
            match total.get_mut(key) {
                Some(acc) => {
                    assert_same_shape(key, acc, tensor);
                    Zip::from(acc).and(tensor).for_each(|a, &t| *a += t);
                }
                None => {
                    total.insert(key.clone(), tensor.clone());
                }
            }
        }
    }
    total
}

/// Per-tensor seed so two tensors of one party never share a mask
fn tensor_seed(pair_seed: u64, key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(pair_seed.to_le_bytes());
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
