use serde::{Deserialize, Serialize};

use colibri_base::ArrayValue;

use crate::device::Device;
use crate::error::InferError;
use crate::style::TaskStyle;

/// Knobs read while a container runs. Persisted inside the bundle except for
/// `sample_input`, which is runtime-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Added to every decision-function score before it is returned.
    pub anomaly_threshold: Option<f32>,
    /// Offset turning decision scores into sample scores; required for
    /// anomaly-detection containers.
    pub score_offset: Option<f32>,
    /// Column width string inputs are encoded to. Without it, string columns
    /// are rejected.
    pub max_string_length: Option<usize>,
    /// Example input kept around for recompilation flows. Never serialized.
    #[serde(skip)]
    pub sample_input: Option<Vec<ArrayValue>>,
}

impl RuntimeConfig {
    /// Reject configurations a style cannot run with.
    pub fn validate_for(&self, style: TaskStyle) -> Result<(), InferError> {
        if style == TaskStyle::AnomalyDetection && self.score_offset.is_none() {
            return Err(InferError::Config(
                "anomaly-detection containers require score_offset".into(),
            ));
        }
        Ok(())
    }
}

/// Construction-time options shared by every container backend.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// Worker thread hint applied process-wide when set.
    pub n_threads: Option<usize>,
    /// Batch size recorded for batched execution.
    pub batch_size: Option<usize>,
    pub config: RuntimeConfig,
}

/// The part of a container that survives save and load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContainerState {
    pub style: TaskStyle,
    pub n_threads: Option<usize>,
    pub batch_size: Option<usize>,
    pub device: Device,
    pub config: RuntimeConfig,
}

impl ContainerState {
    pub fn new(
        style: TaskStyle,
        device: Device,
        options: ContainerOptions,
    ) -> Result<Self, InferError> {
        options.config.validate_for(style)?;
        if let Some(n) = options.n_threads {
            crate::threads::apply_hint(n);
        }
        Ok(Self {
            style,
            n_threads: options.n_threads,
            batch_size: options.batch_size,
            device,
            config: options.config,
        })
    }
}
