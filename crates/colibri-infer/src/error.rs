use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferError {
    /// The method is not part of the container's declared style.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    /// Malformed caller input: wrong arity, dtype or shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A required configuration field is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
    /// The requested device cannot be used in this build.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),
    /// An engine failed while executing the model.
    #[error("compute error: {0}")]
    Compute(String),
    /// A bundle could not be written, read or matched to its loader.
    #[error("bundle error: {0}")]
    Bundle(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<candle_core::Error> for InferError {
    fn from(err: candle_core::Error) -> Self {
        InferError::Compute(err.to_string())
    }
}

impl From<ndarray::ShapeError> for InferError {
    fn from(err: ndarray::ShapeError) -> Self {
        InferError::Compute(err.to_string())
    }
}

impl From<std::io::Error> for InferError {
    fn from(err: std::io::Error) -> Self {
        InferError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for InferError {
    fn from(err: serde_json::Error) -> Self {
        InferError::Bundle(err.to_string())
    }
}

impl From<bincode::Error> for InferError {
    fn from(err: bincode::Error) -> Self {
        InferError::Bundle(err.to_string())
    }
}

impl From<zip::result::ZipError> for InferError {
    fn from(err: zip::result::ZipError) -> Self {
        InferError::Bundle(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for InferError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        InferError::Bundle(err.to_string())
    }
}
