//! Named tensor helpers shared by the privacy engines.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};

/// Named tensor key -> array (ordered so seeded draws are reproducible)
pub type TensorMap = BTreeMap<String, ArrayD<f64>>;

/// L2 norm over every element of the array
pub fn l2_norm(array: &ArrayD<f64>) -> f64 {
    array.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Shapes are assumed to match across calls; a mismatch is a programming error.
pub fn assert_same_shape<A, B>(key: &str, left: &ArrayD<A>, right: &ArrayD<B>) {
    assert_eq!(
        left.shape(),
        right.shape(),
        "shape mismatch for tensor '{}'",
        key
    );
}

/// One tensor on the JSON wire: nested arrays, one level per dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTensor {
    Scalar(f64),
    Nested(Vec<WireTensor>),
}

impl WireTensor {
    fn from_view(view: ArrayViewD<'_, f64>) -> Self {
        if view.ndim() == 0 {
            return WireTensor::Scalar(view.iter().next().copied().unwrap_or_default());
        }
        WireTensor::Nested(view.outer_iter().map(WireTensor::from_view).collect())
    }

    /// Shape read along the first element of every level
    fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::new();
        let mut node = self;
        while let WireTensor::Nested(items) = node {
            shape.push(items.len());
            match items.first() {
                Some(first) => node = first,
                None => break,
            }
        }
        shape
    }

    /// Row-major values; false when the nesting is ragged
    fn flatten_into(&self, shape: &[usize], out: &mut Vec<f64>) -> bool {
        match (self, shape.split_first()) {
            (WireTensor::Scalar(value), None) => {
                out.push(*value);
                true
            }
            (WireTensor::Nested(items), Some((&len, rest))) => {
                items.len() == len && items.iter().all(|item| item.flatten_into(rest, out))
            }
            _ => false,
        }
    }

    fn into_array(self) -> Option<ArrayD<f64>> {
        let shape = self.shape();
        let mut values = Vec::with_capacity(shape.iter().product());
        if !self.flatten_into(&shape, &mut values) {
            return None;
        }
        ArrayD::from_shape_vec(IxDyn(&shape), values).ok()
    }
}

/// Encode tensors for the JSON wire format, keeping their shapes
pub fn to_wire(tensors: &TensorMap) -> BTreeMap<String, WireTensor> {
    tensors
        .iter()
        .map(|(key, array)| (key.clone(), WireTensor::from_view(array.view())))
        .collect()
}

/// Rebuild tensors from the JSON wire format
///
/// Fails with the offending key when a tensor's nesting is ragged.
pub fn from_wire(wire: BTreeMap<String, WireTensor>) -> Result<TensorMap, String> {
    wire.into_iter()
        .map(|(key, tensor)| match tensor.into_array() {
            Some(array) => Ok((key, array)),
            None => Err(format!("tensor '{}' is not rectangular", key)),
        })
        .collect()
}
