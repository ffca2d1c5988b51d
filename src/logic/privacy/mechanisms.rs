//! Noise Mechanisms
//!
//! Clipping and noise calibration. Pure functions, the engine owns state.

use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Exp1, StandardNormal};

use super::types::NoiseMechanism;
use crate::logic::tensor::{l2_norm, TensorMap};

// ============================================================================
// CALIBRATION
// ============================================================================

/// Gaussian sigma for (epsilon, delta)-DP under L2 sensitivity
pub fn gaussian_sigma(sensitivity: f64, epsilon: f64, delta: f64) -> f64 {
    sensitivity * (2.0 * (1.25 / delta).ln()).sqrt() / epsilon
}

/// Laplace scale b for epsilon-DP
pub fn laplace_scale(sensitivity: f64, epsilon: f64) -> f64 {
    sensitivity / epsilon
}

/// Noise scale of `mechanism` (sigma or b)
pub fn noise_scale(mechanism: NoiseMechanism, sensitivity: f64, epsilon: f64, delta: f64) -> f64 {
    match mechanism {
        NoiseMechanism::Gaussian => gaussian_sigma(sensitivity, epsilon, delta),
        NoiseMechanism::Laplacian => laplace_scale(sensitivity, epsilon),
    }
}

// ============================================================================
// CLIPPING
// ============================================================================

/// Scale the whole array down to L2 norm <= max_norm (never up)
pub fn clip_l2(array: &ArrayD<f64>, max_norm: f64) -> ArrayD<f64> {
    let norm = l2_norm(array);
    if norm > max_norm {
        array * (max_norm / norm)
    } else {
        array.clone()
    }
}

pub fn clip_gradients(gradients: &TensorMap, max_norm: f64) -> TensorMap {
    gradients
        .iter()
        .map(|(key, grad)| (key.clone(), clip_l2(grad, max_norm)))
        .collect()
}

// ============================================================================
// SAMPLING
// ============================================================================

/// One draw of zero-mean noise with the given scale
pub fn sample_noise<R: Rng + ?Sized>(rng: &mut R, mechanism: NoiseMechanism, scale: f64) -> f64 {
    match mechanism {
        NoiseMechanism::Gaussian => {
            let z: f64 = rng.sample(StandardNormal);
            z * scale
        }
        NoiseMechanism::Laplacian => {
            // Difference of two Exp(1) draws is Laplace(0, 1)
            let a: f64 = rng.sample(Exp1);
            let b: f64 = rng.sample(Exp1);
            (a - b) * scale
        }
    }
}

/// Independent per-element noise added to every tensor
pub fn perturb<R: Rng + ?Sized>(
    gradients: &TensorMap,
    mechanism: NoiseMechanism,
    scale: f64,
    rng: &mut R,
) -> TensorMap {
    gradients
        .iter()
        .map(|(key, grad)| {
            let noisy = grad.mapv(|v| v + sample_noise(rng, mechanism, scale));
            (key.clone(), noisy)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_gaussian_sigma_formula() {
        let sigma = gaussian_sigma(1.0, 1.0, 1e-5);
        let expected = (2.0 * (1.25f64 / 1e-5).ln()).sqrt();
        assert!((sigma - expected).abs() < 1e-12);
    }

    #[test]
    fn test_doubling_epsilon_halves_sigma() {
        for &(eps, delta) in &[(0.5, 1e-5), (1.0, 1e-3), (3.0, 0.1)] {
            let s1 = gaussian_sigma(2.0, eps, delta);
            let s2 = gaussian_sigma(2.0, eps * 2.0, delta);
            assert!((s1 / s2 - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_clip_large_gradient_to_max_norm() {
        let grad = arr1(&[3.0, 4.0, 12.0]).into_dyn(); // norm 13
        let clipped = clip_l2(&grad, 1.0);
        assert!((l2_norm(&clipped) - 1.0).abs() < 1e-12);
        // Direction preserved
        assert!((clipped[[0]] / clipped[[1]] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_clip_small_gradient_unchanged() {
        let grad = arr1(&[0.1, -0.2, 0.3]).into_dyn();
        assert_eq!(clip_l2(&grad, 1.0), grad);

        let zero = arr1(&[0.0, 0.0]).into_dyn();
        assert_eq!(clip_l2(&zero, 1.0), zero);
    }

    #[test]
    fn test_sample_std_matches_scale() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;

        let draws: Vec<f64> = (0..n)
            .map(|_| sample_noise(&mut rng, NoiseMechanism::Gaussian, 2.0))
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((var.sqrt() - 2.0).abs() < 0.1);

        // Laplace(0, b) has std b * sqrt(2)
        let draws: Vec<f64> = (0..n)
            .map(|_| sample_noise(&mut rng, NoiseMechanism::Laplacian, 1.0))
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((var.sqrt() - 2f64.sqrt()).abs() < 0.1);
    }
}
