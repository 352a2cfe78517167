use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};

use colibri_base::ArrayValue;

use crate::bundle::{self, BackendKind, BundleWriter, GRAPH_FILE, KERNELS_FILE};
use crate::config::{ContainerOptions, ContainerState, RuntimeConfig};
use crate::engines::aot::{AotModule, DeviceContext, KernelLibrary};
use crate::error::InferError;
use crate::graph::Graph;
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

use super::{into_matrix, into_vector};

/// Container over the shape-specialized engine. The compiled batch size is
/// authoritative: a conflicting `batch_size` option is rejected and a
/// missing one is filled in from the module.
#[derive(Debug)]
pub struct AotContainer {
    module: AotModule,
    state: ContainerState,
}

impl AotContainer {
    pub fn new(
        module: AotModule,
        style: TaskStyle,
        mut options: ContainerOptions,
    ) -> Result<Self, InferError> {
        match options.batch_size {
            None => options.batch_size = Some(module.batch_size()),
            Some(b) if b != module.batch_size() => {
                return Err(InferError::Config(format!(
                    "container batch size {b} does not match the compiled batch size {}",
                    module.batch_size()
                )));
            }
            Some(_) => {}
        }
        let state = ContainerState::new(style, module.ctx().device().clone(), options)?;
        Ok(Self { module, state })
    }

    /// The wrapped engine module.
    pub fn model(&self) -> &AotModule {
        &self.module
    }

    pub fn load(location: &Path, unpack: bool) -> Result<Self, InferError> {
        let dir = bundle::open(location, unpack)?;
        bundle::check_tag(&dir, BackendKind::Aot)?;
        let state = bundle::read_state(&dir)?;
        let graph: Graph = bundle::read_json(&dir, GRAPH_FILE)?;
        let library: KernelLibrary = bundle::read_json(&dir, KERNELS_FILE)?;
        let params = bundle::read_params(&dir)?;
        let ctx = DeviceContext::new(state.device.clone());
        let module = AotModule::with_library(graph, params, library, ctx)?;
        bundle::reapply_threads(&state);
        log::info!("loaded aot container from {}", dir.display());
        Ok(Self { module, state })
    }

    fn run_slot(&mut self, columns: &[ArrayValue], slot: usize) -> Result<ArrayD<f32>, InferError> {
        let mut inputs = Vec::with_capacity(columns.len());
        for column in columns {
            inputs.push(self.module.to_device_array(column)?);
        }
        self.module.run(inputs)?;
        self.module.get_output(slot)
    }
}

impl Container for AotContainer {
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
        let writer = BundleWriter::create(location, BackendKind::Aot)?;
        writer.write_json(GRAPH_FILE, self.module.graph())?;
        writer.write_json(KERNELS_FILE, self.module.library())?;
        writer.write_params(self.module.params())?;
        writer.write_state(&self.state)?;
        let archive = writer.finish()?;
        log::info!("saved aot container to {}", archive.display());
        Ok(archive)
    }
}

impl Transformer for AotContainer {
    fn compute_transform(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.run_slot(columns, 0)
    }
}

impl Predictor for AotContainer {
    fn compute_predict(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.run_slot(columns, 0)
    }
}

impl Classifier for AotContainer {
    fn compute_predict_proba(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array2<f32>, InferError> {
        into_matrix(self.run_slot(columns, 1)?)
    }
}

impl AnomalyDetector for AotContainer {
    fn compute_decision_function(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array1<f32>, InferError> {
        Ok(into_vector(self.run_slot(columns, 1)?))
    }
}
