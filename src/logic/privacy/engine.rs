//! Differential Privacy Engine
//!
//! Clips and perturbs gradients or scalar queries and keeps the budget.
//! Budget check, noise draw and consumption run under one lock so that
//! concurrent callers can never overspend.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::mechanisms::{clip_gradients, noise_scale, perturb, sample_noise};
use super::types::{NoiseMechanism, PrivacyBudget};
use crate::constants::{BUDGET_QUERY_ALLOWANCE, DEFAULT_MAX_GRAD_NORM};
use crate::error::{FederationError, FederationResult};
use crate::logic::tensor::TensorMap;

/// Everything mutated by a query
struct EngineState {
    budget: PrivacyBudget,
    rng: StdRng,
}

pub struct DifferentialPrivacy {
    epsilon: f64,
    delta: f64,
    max_grad_norm: f64,
    mechanism: NoiseMechanism,
    state: Mutex<EngineState>,
}

impl DifferentialPrivacy {
    /// Gaussian engine with clip norm 1.0 and an entropy-seeded RNG
    pub fn new(epsilon: f64, delta: f64) -> FederationResult<Self> {
        validate_epsilon(epsilon)?;
        validate_delta(delta)?;

        Ok(Self {
            epsilon,
            delta,
            max_grad_norm: DEFAULT_MAX_GRAD_NORM,
            mechanism: NoiseMechanism::Gaussian,
            state: Mutex::new(EngineState {
                budget: initial_budget(epsilon, delta),
                rng: StdRng::from_entropy(),
            }),
        })
    }

    pub fn with_max_grad_norm(mut self, max_grad_norm: f64) -> FederationResult<Self> {
        if !(max_grad_norm > 0.0) {
            return Err(FederationError::InvalidPrivacyParameter(format!(
                "max_grad_norm must be > 0, got {}",
                max_grad_norm
            )));
        }
        self.max_grad_norm = max_grad_norm;
        Ok(self)
    }

    pub fn with_mechanism(mut self, mechanism: NoiseMechanism) -> Self {
        self.mechanism = mechanism;
        self
    }

    /// Deterministic noise draws for reproducible runs
    pub fn with_seed(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.state.get_mut().rng = rng;
        self
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn max_grad_norm(&self) -> f64 {
        self.max_grad_norm
    }

    pub fn mechanism(&self) -> NoiseMechanism {
        self.mechanism
    }

    /// Noise scale (sigma or b) this engine uses for gradients at (epsilon, delta)
    pub fn gradient_noise_scale(&self, epsilon: f64, delta: f64) -> f64 {
        noise_scale(self.mechanism, self.max_grad_norm, epsilon, delta)
    }

    /// Clip every gradient to `max_grad_norm`, then add calibrated noise
    pub fn add_noise(
        &self,
        gradients: &TensorMap,
        epsilon: Option<f64>,
        delta: Option<f64>,
    ) -> FederationResult<TensorMap> {
        let eps = epsilon.unwrap_or(self.epsilon);
        let dlt = delta.unwrap_or(self.delta);
        validate_epsilon(eps)?;
        validate_delta(dlt)?;

        let delta_cost = self.mechanism.delta_cost(dlt);
        let scale = self.gradient_noise_scale(eps, dlt);

        let mut state = self.state.lock();
        check_budget(&state.budget, eps, delta_cost)?;

        let clipped = clip_gradients(gradients, self.max_grad_norm);
        let noisy = perturb(&clipped, self.mechanism, scale, &mut state.rng);

        state.budget.consume(eps, delta_cost);
        tracing::debug!(
            mechanism = %self.mechanism,
            epsilon = eps,
            delta = delta_cost,
            scale,
            tensors = gradients.len(),
            consumed_epsilon = state.budget.consumed_epsilon,
            "Privacy noise applied to gradients"
        );

        Ok(noisy)
    }

    /// Perturb a scalar query result with the given sensitivity
    pub fn privatize_query(
        &self,
        value: f64,
        sensitivity: f64,
        epsilon: Option<f64>,
    ) -> FederationResult<f64> {
        let eps = epsilon.unwrap_or(self.epsilon);
        validate_epsilon(eps)?;
        if !(sensitivity >= 0.0) {
            return Err(FederationError::InvalidPrivacyParameter(format!(
                "sensitivity must be >= 0, got {}",
                sensitivity
            )));
        }

        let delta_cost = self.mechanism.delta_cost(self.delta);
        let scale = noise_scale(self.mechanism, sensitivity, eps, self.delta);

        let mut state = self.state.lock();
        check_budget(&state.budget, eps, delta_cost)?;

        let noisy = value + sample_noise(&mut state.rng, self.mechanism, scale);

        state.budget.consume(eps, delta_cost);
        tracing::debug!(
            mechanism = %self.mechanism,
            epsilon = eps,
            sensitivity,
            consumed_epsilon = state.budget.consumed_epsilon,
            "Privacy noise applied to query"
        );

        Ok(noisy)
    }

    /// Read-only snapshot
    pub fn budget_status(&self) -> PrivacyBudget {
        self.state.lock().budget.clone()
    }

    /// Start a new accounting period (e.g. a new training epoch)
    pub fn reset_budget(&self) {
        let mut state = self.state.lock();
        state.budget.reset();
        tracing::info!(
            total_epsilon = state.budget.total_epsilon,
            total_delta = state.budget.total_delta,
            "Privacy budget reset"
        );
    }
}

impl std::fmt::Debug for DifferentialPrivacy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DifferentialPrivacy")
            .field("epsilon", &self.epsilon)
            .field("delta", &self.delta)
            .field("max_grad_norm", &self.max_grad_norm)
            .field("mechanism", &self.mechanism)
            .field("budget", &self.budget_status())
            .finish()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn initial_budget(epsilon: f64, delta: f64) -> PrivacyBudget {
    PrivacyBudget::new(epsilon * BUDGET_QUERY_ALLOWANCE, delta * BUDGET_QUERY_ALLOWANCE)
}

fn check_budget(budget: &PrivacyBudget, epsilon: f64, delta: f64) -> FederationResult<()> {
    if budget.can_afford(epsilon, delta) {
        return Ok(());
    }

    tracing::warn!(
        requested_epsilon = epsilon,
        remaining_epsilon = budget.remaining_epsilon(),
        queries = budget.query_count,
        "Privacy budget exhausted"
    );
    Err(FederationError::BudgetExhausted {
        requested_epsilon: epsilon,
        requested_delta: delta,
        remaining_epsilon: budget.remaining_epsilon(),
        remaining_delta: budget.remaining_delta(),
    })
}

fn validate_epsilon(epsilon: f64) -> FederationResult<()> {
    if epsilon > 0.0 && epsilon.is_finite() {
        Ok(())
    } else {
        Err(FederationError::InvalidPrivacyParameter(format!(
            "epsilon must be > 0, got {}",
            epsilon
        )))
    }
}

fn validate_delta(delta: f64) -> FederationResult<()> {
    if delta > 0.0 && delta < 1.0 {
        Ok(())
    } else {
        Err(FederationError::InvalidPrivacyParameter(format!(
            "delta must be in (0, 1), got {}",
            delta
        )))
    }
}
