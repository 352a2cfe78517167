use std::fmt;

use ndarray::Axis;

use crate::value::ArrayValue;

#[derive(Debug, PartialEq)]
pub enum FrameError {
    DuplicateColumn(String),
    NotAColumn { shape: Vec<usize> },
    RowMismatch { expected: usize, got: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::DuplicateColumn(name) => write!(f, "column {name:?} already exists"),
            FrameError::NotAColumn { shape } => {
                write!(f, "columns must be 1-D or single-column 2-D, got shape {shape:?}")
            }
            FrameError::RowMismatch { expected, got } => {
                write!(f, "row count mismatch: frame has {expected} rows, column has {got}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// A labeled-column tabular value.
///
/// Columns share one row count and keep their own dtype. Before inference a
/// frame is split into one single-column 2-D array per column, in insertion
/// order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    columns: Vec<(String, ArrayValue)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column, reshaping 1-D input to `(rows, 1)`.
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: impl Into<ArrayValue>,
    ) -> Result<(), FrameError> {
        let name = name.into();
        if self.columns.iter().any(|(n, _)| *n == name) {
            return Err(FrameError::DuplicateColumn(name));
        }
        let column = into_column(values.into())?;
        if let Some((_, first)) = self.columns.first() {
            if first.rows() != column.rows() {
                return Err(FrameError::RowMismatch {
                    expected: first.rows(),
                    got: column.rows(),
                });
            }
        }
        self.columns.push((name, column));
        Ok(())
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: impl Into<ArrayValue>,
    ) -> Result<Self, FrameError> {
        self.push_column(name, values)?;
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.rows()).unwrap_or(0)
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Columns as single-column 2-D arrays, in insertion order.
    pub fn split_columns(&self) -> Vec<ArrayValue> {
        self.columns.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn into_columns(self) -> Vec<ArrayValue> {
        self.columns.into_iter().map(|(_, c)| c).collect()
    }
}

fn into_column(value: ArrayValue) -> Result<ArrayValue, FrameError> {
    match value.ndim() {
        1 => Ok(widen_to_column(value)),
        2 if value.shape()[1] == 1 => Ok(value),
        _ => Err(FrameError::NotAColumn { shape: value.shape().to_vec() }),
    }
}

fn widen_to_column(value: ArrayValue) -> ArrayValue {
    match value {
        ArrayValue::F32(a) => ArrayValue::F32(a.insert_axis(Axis(1))),
        ArrayValue::F64(a) => ArrayValue::F64(a.insert_axis(Axis(1))),
        ArrayValue::I32(a) => ArrayValue::I32(a.insert_axis(Axis(1))),
        ArrayValue::I64(a) => ArrayValue::I64(a.insert_axis(Axis(1))),
        ArrayValue::Str(a) => ArrayValue::Str(a.insert_axis(Axis(1))),
    }
}
