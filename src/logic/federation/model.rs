//! Local Model Capability
//!
//! The client trains whatever model the organization plugs in. A model
//! exposes its weights through one of four accessors; they are checked in
//! priority order and the first one present wins.

use ndarray::{Array1, Array2, ArrayD};

use crate::error::{FederationError, FederationResult};
use crate::logic::tensor::TensorMap;

/// Which weight accessor a model answered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Linear,
    Layered,
    NamedParams,
    Importance,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::Layered => "layered",
            ModelKind::NamedParams => "named_params",
            ModelKind::Importance => "importance",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of model weights, one variant per capability
#[derive(Debug, Clone, PartialEq)]
pub enum ModelWeights {
    Linear {
        coef: ArrayD<f64>,
        intercept: Option<ArrayD<f64>>,
    },
    Layered(Vec<ArrayD<f64>>),
    NamedParams(TensorMap),
    Importance(ArrayD<f64>),
}

impl ModelWeights {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelWeights::Linear { .. } => ModelKind::Linear,
            ModelWeights::Layered(_) => ModelKind::Layered,
            ModelWeights::NamedParams(_) => ModelKind::NamedParams,
            ModelWeights::Importance(_) => ModelKind::Importance,
        }
    }

    /// Flatten into named tensors
    ///
    /// Keys: `coef`/`intercept`, `layer_{i}`, parameter names, `feature_importances`.
    pub fn into_tensors(self) -> TensorMap {
        let mut tensors = TensorMap::new();
        match self {
            ModelWeights::Linear { coef, intercept } => {
                tensors.insert("coef".to_string(), coef);
                if let Some(intercept) = intercept {
                    tensors.insert("intercept".to_string(), intercept);
                }
            }
            ModelWeights::Layered(layers) => {
                for (i, layer) in layers.into_iter().enumerate() {
                    tensors.insert(format!("layer_{}", i), layer);
                }
            }
            ModelWeights::NamedParams(params) => tensors = params,
            ModelWeights::Importance(importances) => {
                tensors.insert("feature_importances".to_string(), importances);
            }
        }
        tensors
    }
}

/// Trainable model owned by the organization
///
/// Implement at least one weight accessor; the rest default to `None`.
pub trait LocalModel: Send {
    fn linear_coefficients(&self) -> Option<(ArrayD<f64>, Option<ArrayD<f64>>)> {
        None
    }

    fn layer_weights(&self) -> Option<Vec<ArrayD<f64>>> {
        None
    }

    fn named_parameters(&self) -> Option<TensorMap> {
        None
    }

    fn feature_importances(&self) -> Option<ArrayD<f64>> {
        None
    }

    /// One pass over the data (incremental or full refit)
    fn train_epoch(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> FederationResult<()>;

    /// Accuracy on labeled data
    fn score(&self, features: &Array2<f64>, labels: &Array1<f64>) -> f64;

    /// Positive-class probability per row, if the model has one
    fn predict_proba(&self, _features: &Array2<f64>) -> Option<Array1<f64>> {
        None
    }
}

/// Read weights through the first capability the model exposes
pub fn extract_weights<M: LocalModel + ?Sized>(model: &M) -> FederationResult<ModelWeights> {
    if let Some((coef, intercept)) = model.linear_coefficients() {
        return Ok(ModelWeights::Linear { coef, intercept });
    }
    if let Some(layers) = model.layer_weights() {
        return Ok(ModelWeights::Layered(layers));
    }
    if let Some(params) = model.named_parameters() {
        return Ok(ModelWeights::NamedParams(params));
    }
    if let Some(importances) = model.feature_importances() {
        return Ok(ModelWeights::Importance(importances));
    }
    Err(FederationError::UnsupportedModel)
}
