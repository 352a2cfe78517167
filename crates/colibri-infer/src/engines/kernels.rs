//! f32 kernels shared by the ndarray-backed engines.

use ndarray::{Array1, ArrayD, ArrayView2, Ix1, Ix2};

use crate::error::InferError;

pub(crate) fn as_matrix<'a>(
    array: &'a ArrayD<f32>,
    what: &str,
) -> Result<ArrayView2<'a, f32>, InferError> {
    array.view().into_dimensionality::<Ix2>().map_err(|_| {
        InferError::Compute(format!("{what} is not 2-D (shape {:?})", array.shape()))
    })
}

pub(crate) fn gemm(
    x: &ArrayD<f32>,
    w: &ArrayD<f32>,
    b: Option<&ArrayD<f32>>,
) -> Result<ArrayD<f32>, InferError> {
    let x = as_matrix(x, "gemm input")?;
    let w = as_matrix(w, "gemm weights")?;
    if x.ncols() != w.nrows() {
        return Err(InferError::Compute(format!(
            "gemm shape mismatch: input {:?} vs weights {:?}",
            x.shape(),
            w.shape()
        )));
    }
    let mut out = x.dot(&w);
    if let Some(b) = b {
        let b = b.view().into_dimensionality::<Ix1>().map_err(|_| {
            InferError::Compute(format!("gemm bias is not 1-D (shape {:?})", b.shape()))
        })?;
        if b.len() != out.ncols() {
            return Err(InferError::Compute(format!(
                "gemm bias has {} entries for {} columns",
                b.len(),
                out.ncols()
            )));
        }
        for mut row in out.rows_mut() {
            row += &b;
        }
    }
    Ok(out.into_dyn())
}

pub(crate) fn relu(x: &ArrayD<f32>) -> ArrayD<f32> {
    x.mapv(|v| v.max(0.0))
}

pub(crate) fn sigmoid(x: &ArrayD<f32>) -> ArrayD<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

pub(crate) fn affine(x: &ArrayD<f32>, mul: f32, add: f32) -> ArrayD<f32> {
    x.mapv(|v| v * mul + add)
}

/// Rowwise softmax with the usual max subtraction.
pub(crate) fn softmax(x: &ArrayD<f32>) -> Result<ArrayD<f32>, InferError> {
    let mut out = as_matrix(x, "softmax input")?.to_owned();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
    Ok(out.into_dyn())
}

/// Rowwise index of the first maximum, as f32.
pub(crate) fn argmax(x: &ArrayD<f32>) -> Result<ArrayD<f32>, InferError> {
    let matrix = as_matrix(x, "argmax input")?;
    let mut out = Vec::with_capacity(matrix.nrows());
    for row in matrix.rows() {
        let mut best = 0usize;
        let mut best_value = f32::NEG_INFINITY;
        for (i, &v) in row.iter().enumerate() {
            if v > best_value {
                best = i;
                best_value = v;
            }
        }
        out.push(best as f32);
    }
    Ok(Array1::from_vec(out).into_dyn())
}
