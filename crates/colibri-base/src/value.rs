use ndarray::{Array, ArrayD, Axis, Dimension, Slice};

/// Element type tag for an [`ArrayValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    F32,
    F64,
    I32,
    I64,
    Str,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::Str => "str",
        }
    }
}

/// A dynamically typed n-dimensional array.
///
/// Inference inputs keep their source dtype until an engine decides how to
/// coerce them, so everything upstream of an engine moves these around
/// instead of raw `ndarray` values.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    Str(ArrayD<String>),
}

impl ArrayValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ArrayValue::F32(_) => ValueKind::F32,
            ArrayValue::F64(_) => ValueKind::F64,
            ArrayValue::I32(_) => ValueKind::I32,
            ArrayValue::I64(_) => ValueKind::I64,
            ArrayValue::Str(_) => ValueKind::Str,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            ArrayValue::F32(a) => a.shape(),
            ArrayValue::F64(a) => a.shape(),
            ArrayValue::I32(a) => a.shape(),
            ArrayValue::I64(a) => a.shape(),
            ArrayValue::Str(a) => a.shape(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the first axis; the row count for 1-D and 2-D arrays.
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    /// Owned copy of rows `start..end` along the first axis.
    pub fn slice_rows(&self, start: usize, end: usize) -> ArrayValue {
        let range = Slice::from(start..end);
        match self {
            ArrayValue::F32(a) => ArrayValue::F32(a.slice_axis(Axis(0), range).to_owned()),
            ArrayValue::F64(a) => ArrayValue::F64(a.slice_axis(Axis(0), range).to_owned()),
            ArrayValue::I32(a) => ArrayValue::I32(a.slice_axis(Axis(0), range).to_owned()),
            ArrayValue::I64(a) => ArrayValue::I64(a.slice_axis(Axis(0), range).to_owned()),
            ArrayValue::Str(a) => ArrayValue::Str(a.slice_axis(Axis(0), range).to_owned()),
        }
    }

    /// Owned copy of column `index` of a 2-D array, kept single-column 2-D.
    ///
    /// Panics when the array has fewer than two axes.
    pub fn slice_column(&self, index: usize) -> ArrayValue {
        let range = Slice::from(index..index + 1);
        match self {
            ArrayValue::F32(a) => ArrayValue::F32(a.slice_axis(Axis(1), range).to_owned()),
            ArrayValue::F64(a) => ArrayValue::F64(a.slice_axis(Axis(1), range).to_owned()),
            ArrayValue::I32(a) => ArrayValue::I32(a.slice_axis(Axis(1), range).to_owned()),
            ArrayValue::I64(a) => ArrayValue::I64(a.slice_axis(Axis(1), range).to_owned()),
            ArrayValue::Str(a) => ArrayValue::Str(a.slice_axis(Axis(1), range).to_owned()),
        }
    }

    /// The numeric kinds cast to f32. `None` for string arrays.
    pub fn to_f32(&self) -> Option<ArrayD<f32>> {
        match self {
            ArrayValue::F32(a) => Some(a.clone()),
            ArrayValue::F64(a) => Some(a.mapv(|v| v as f32)),
            ArrayValue::I32(a) => Some(a.mapv(|v| v as f32)),
            ArrayValue::I64(a) => Some(a.mapv(|v| v as f32)),
            ArrayValue::Str(_) => None,
        }
    }
}

impl<D: Dimension> From<Array<f32, D>> for ArrayValue {
    fn from(a: Array<f32, D>) -> Self {
        ArrayValue::F32(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<f64, D>> for ArrayValue {
    fn from(a: Array<f64, D>) -> Self {
        ArrayValue::F64(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<i32, D>> for ArrayValue {
    fn from(a: Array<i32, D>) -> Self {
        ArrayValue::I32(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<i64, D>> for ArrayValue {
    fn from(a: Array<i64, D>) -> Self {
        ArrayValue::I64(a.into_dyn())
    }
}

impl<D: Dimension> From<Array<String, D>> for ArrayValue {
    fn from(a: Array<String, D>) -> Self {
        ArrayValue::Str(a.into_dyn())
    }
}
