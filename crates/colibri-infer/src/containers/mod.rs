mod aot;
mod eager;
mod ir;
mod script;

pub use aot::AotContainer;
pub use eager::EagerContainer;
pub use ir::IrContainer;
pub use script::ScriptContainer;

use ndarray::{Array1, Array2, ArrayD, Ix2};

use crate::error::InferError;

/// Reshape an engine output into the 2-D per-class layout.
pub(crate) fn into_matrix(array: ArrayD<f32>) -> Result<Array2<f32>, InferError> {
    array
        .into_dimensionality::<Ix2>()
        .map_err(|e| InferError::Compute(format!("expected a 2-D output: {e}")))
}

pub(crate) fn into_vector(array: ArrayD<f32>) -> Array1<f32> {
    Array1::from_iter(array.iter().copied())
}
