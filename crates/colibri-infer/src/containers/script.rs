use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};

use colibri_base::ArrayValue;

use crate::bundle::{self, BackendKind, BundleWriter, PROGRAM_FILE};
use crate::config::{ContainerOptions, ContainerState, RuntimeConfig};
use crate::device::Device;
use crate::engines::script::{ScriptModule, ScriptProgram, coerce_inputs};
use crate::engines::{tensor_to_array, value_to_tensor};
use crate::error::InferError;
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

use super::{into_matrix, into_vector};

/// Container over the lowered register program. Columns are coerced to the
/// compile-time dtypes before every call, so f64 and i32 inputs keep working
/// after a save and load cycle.
#[derive(Debug)]
pub struct ScriptContainer {
    module: ScriptModule,
    state: ContainerState,
}

impl ScriptContainer {
    pub fn new(
        module: ScriptModule,
        style: TaskStyle,
        options: ContainerOptions,
    ) -> Result<Self, InferError> {
        let state = ContainerState::new(style, module.device().clone(), options)?;
        Ok(Self { module, state })
    }

    /// The wrapped engine module.
    pub fn model(&self) -> &ScriptModule {
        &self.module
    }

    /// Move the program constants to another device.
    pub fn to_device(&mut self, device: Device) -> Result<(), InferError> {
        self.module.to_device(device.clone())?;
        self.state.device = device;
        Ok(())
    }

    pub fn load(location: &Path, unpack: bool) -> Result<Self, InferError> {
        let dir = bundle::open(location, unpack)?;
        bundle::check_tag(&dir, BackendKind::Script)?;
        let state = bundle::read_state(&dir)?;
        let program: ScriptProgram = bundle::read_json(&dir, PROGRAM_FILE)?;
        let params = bundle::read_params(&dir)?;
        let module = ScriptModule::with_program(program, &params, state.device.clone())?;
        bundle::reapply_threads(&state);
        log::info!("loaded script container from {}", dir.display());
        Ok(Self { module, state })
    }

    fn forward_slot(
        &self,
        columns: &[ArrayValue],
        slot: usize,
    ) -> Result<ArrayD<f32>, InferError> {
        let coerced = coerce_inputs(columns, self.state.config.max_string_length)?;
        let mut tensors = Vec::with_capacity(coerced.len());
        for column in &coerced {
            tensors.push(value_to_tensor(column, self.module.candle_device())?);
        }
        let outputs = self.module.forward(tensors)?;
        let tensor = outputs.get(slot).ok_or_else(|| {
            InferError::Compute(format!(
                "program produced {} outputs, needed slot {slot}",
                outputs.len()
            ))
        })?;
        tensor_to_array(tensor)
    }
}

impl Container for ScriptContainer {
    fn style(&self) -> TaskStyle {
        self.state.style
    }

    fn batch_size(&self) -> Option<usize> {
        self.state.batch_size
    }

    fn n_threads(&self) -> Option<usize> {
        self.state.n_threads
    }

    fn config(&self) -> &RuntimeConfig {
        &self.state.config
    }

    fn save(&self, location: &Path) -> Result<PathBuf, InferError> {
        let writer = BundleWriter::create(location, BackendKind::Script)?;
        writer.write_json(PROGRAM_FILE, self.module.program())?;
        writer.write_params(&self.module.const_params()?)?;
        writer.write_state(&self.state)?;
        let archive = writer.finish()?;
        log::info!("saved script container to {}", archive.display());
        Ok(archive)
    }
}

impl Transformer for ScriptContainer {
    fn compute_transform(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.forward_slot(columns, 0)
    }
}

impl Predictor for ScriptContainer {
    fn compute_predict(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.forward_slot(columns, 0)
    }
}

impl Classifier for ScriptContainer {
    fn compute_predict_proba(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array2<f32>, InferError> {
        into_matrix(self.forward_slot(columns, 1)?)
    }
}

impl AnomalyDetector for ScriptContainer {
    fn compute_decision_function(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array1<f32>, InferError> {
        Ok(into_vector(self.forward_slot(columns, 1)?))
    }
}
