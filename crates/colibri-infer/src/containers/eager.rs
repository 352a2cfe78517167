use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};

use colibri_base::ArrayValue;

use crate::bundle::{self, BackendKind, BundleWriter, MODULE_FILE};
use crate::config::{ContainerOptions, ContainerState, RuntimeConfig};
use crate::device::Device;
use crate::engines::eager::EagerModule;
use crate::engines::{tensor_to_array, value_to_tensor};
use crate::error::InferError;
use crate::graph::{Graph, Params};
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

use super::{into_matrix, into_vector};

/// Container over the tensor-graph engine: every call converts its columns
/// to device tensors and walks the graph node by node.
#[derive(Debug)]
pub struct EagerContainer {
    module: EagerModule,
    state: ContainerState,
}

impl EagerContainer {
    pub fn new(
        module: EagerModule,
        style: TaskStyle,
        options: ContainerOptions,
    ) -> Result<Self, InferError> {
        let state = ContainerState::new(style, module.device().clone(), options)?;
        Ok(Self { module, state })
    }

    /// The wrapped engine module.
    pub fn model(&self) -> &EagerModule {
        &self.module
    }

    /// Move the model parameters to another device.
    pub fn to_device(&mut self, device: Device) -> Result<(), InferError> {
        self.module.to_device(device.clone())?;
        self.state.device = device;
        Ok(())
    }

    /// Read a container back from `{location}.zip`, or from a still-unpacked
    /// bundle directory when `unpack` is false.
    pub fn load(location: &Path, unpack: bool) -> Result<Self, InferError> {
        let dir = bundle::open(location, unpack)?;
        bundle::check_tag(&dir, BackendKind::Eager)?;
        let state = bundle::read_state(&dir)?;
        let graph: Graph = bundle::read_json(&dir, MODULE_FILE)?;
        let params = bundle::read_params(&dir)?;
        let module = EagerModule::new(graph, &params, state.device.clone())?;
        bundle::reapply_threads(&state);
        log::info!("loaded eager container from {}", dir.display());
        Ok(Self { module, state })
    }

    fn forward_slot(
        &self,
        columns: &[ArrayValue],
        slot: usize,
    ) -> Result<ArrayD<f32>, InferError> {
        let mut tensors = Vec::with_capacity(columns.len());
        for column in columns {
            tensors.push(value_to_tensor(column, self.module.candle_device())?);
        }
        let outputs = self.module.forward(tensors)?;
        let tensor = outputs.get(slot).ok_or_else(|| {
            InferError::Compute(format!(
                "model produced {} outputs, needed slot {slot}",
                outputs.len()
            ))
        })?;
        tensor_to_array(tensor)
    }
}

impl Container for EagerContainer {
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
        let writer = BundleWriter::create(location, BackendKind::Eager)?;
        writer.write_json(MODULE_FILE, self.module.graph())?;
        writer.write_params(&Params::from_candle(self.module.params())?)?;
        writer.write_state(&self.state)?;
        let archive = writer.finish()?;
        log::info!("saved eager container to {}", archive.display());
        Ok(archive)
    }
}

impl Transformer for EagerContainer {
    fn compute_transform(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.forward_slot(columns, 0)
    }
}

impl Predictor for EagerContainer {
    fn compute_predict(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.forward_slot(columns, 0)
    }
}

impl Classifier for EagerContainer {
    fn compute_predict_proba(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array2<f32>, InferError> {
        into_matrix(self.forward_slot(columns, 1)?)
    }
}

impl AnomalyDetector for EagerContainer {
    fn compute_decision_function(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array1<f32>, InferError> {
        Ok(into_vector(self.forward_slot(columns, 1)?))
    }
}
