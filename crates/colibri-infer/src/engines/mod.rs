pub mod aot;
pub mod eager;
pub mod ir;
mod kernels;
pub mod script;

use candle_core::{DType, Tensor};
use ndarray::{ArrayD, IxDyn};

use colibri_base::ArrayValue;

use crate::error::InferError;

/// Convert a caller column to a candle tensor on `device`.
///
/// Integer kinds widen to i64. String arrays must be encoded before they get
/// here; the candle engines have no string dtype.
pub(crate) fn value_to_tensor(
    value: &ArrayValue,
    device: &candle_core::Device,
) -> Result<Tensor, InferError> {
    let shape = value.shape().to_vec();
    match value {
        ArrayValue::F32(a) => Ok(Tensor::from_vec(
            a.iter().copied().collect::<Vec<f32>>(),
            shape,
            device,
        )?),
        ArrayValue::F64(a) => Ok(Tensor::from_vec(
            a.iter().copied().collect::<Vec<f64>>(),
            shape,
            device,
        )?),
        ArrayValue::I32(a) => Ok(Tensor::from_vec(
            a.iter().map(|&v| i64::from(v)).collect::<Vec<i64>>(),
            shape,
            device,
        )?),
        ArrayValue::I64(a) => Ok(Tensor::from_vec(
            a.iter().copied().collect::<Vec<i64>>(),
            shape,
            device,
        )?),
        ArrayValue::Str(_) => Err(InferError::InvalidInput(
            "string inputs are not supported by this engine".into(),
        )),
    }
}

/// Copy a tensor back into an f32 ndarray.
pub(crate) fn tensor_to_array(tensor: &Tensor) -> Result<ArrayD<f32>, InferError> {
    let shape = tensor.dims().to_vec();
    let flat = tensor
        .to_dtype(DType::F32)?
        .contiguous()?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), flat)?)
}
