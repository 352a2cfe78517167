use ndarray::{Array, Dimension};

use colibri_base::{ArrayValue, Frame};

use crate::error::InferError;

/// Anything a container method accepts as model input: a named frame or a
/// bare list of columns. Every public inference method takes
/// `impl Into<PredictInput>`, so callers pass frames, column vectors, or a
/// single array directly.
#[derive(Debug, Clone)]
pub enum PredictInput {
    Frame(Frame),
    Columns(Vec<ArrayValue>),
}

impl PredictInput {
    /// Flatten to positional columns; frames contribute theirs in insertion
    /// order.
    pub fn into_columns(self) -> Vec<ArrayValue> {
        match self {
            PredictInput::Frame(frame) => frame.into_columns(),
            PredictInput::Columns(columns) => columns,
        }
    }
}

impl From<Frame> for PredictInput {
    fn from(frame: Frame) -> Self {
        PredictInput::Frame(frame)
    }
}

impl From<Vec<ArrayValue>> for PredictInput {
    fn from(columns: Vec<ArrayValue>) -> Self {
        PredictInput::Columns(columns)
    }
}

impl From<ArrayValue> for PredictInput {
    fn from(value: ArrayValue) -> Self {
        PredictInput::Columns(vec![value])
    }
}

impl<D: Dimension> From<Array<f32, D>> for PredictInput {
    fn from(array: Array<f32, D>) -> Self {
        PredictInput::Columns(vec![ArrayValue::from(array)])
    }
}

/// Row count shared by a column list, taken from the first column.
pub(crate) fn total_rows(columns: &[ArrayValue]) -> Result<usize, InferError> {
    let first = columns
        .first()
        .ok_or_else(|| InferError::InvalidInput("no input columns".into()))?;
    Ok(first.rows())
}
