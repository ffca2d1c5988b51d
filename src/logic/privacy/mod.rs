//! Privacy Module
//!
//! Differential privacy for gradients and scalar queries.
//!
//! ## Structure
//! - `types`: PrivacyBudget, NoiseMechanism
//! - `mechanisms`: clipping, calibration, noise sampling
//! - `engine`: DifferentialPrivacy (budget-enforcing entry point)
//!
//! ## Usage
//! ```ignore
//! let dp = DifferentialPrivacy::new(1.0, 1e-5)?.with_seed(42);
//! let private = dp.add_noise(&gradients, None, None)?;
//! ```

pub mod types;
pub mod mechanisms;
pub mod engine;


pub use types::{NoiseMechanism, PrivacyBudget};
pub use mechanisms::{clip_gradients, clip_l2, gaussian_sigma, laplace_scale};
pub use engine::DifferentialPrivacy;
