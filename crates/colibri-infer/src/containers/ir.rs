use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD};

use colibri_base::ArrayValue;

use crate::bundle::{self, BackendKind, BundleWriter, GRAPH_FILE, KERNELS_FILE};
use crate::config::{ContainerOptions, ContainerState, RuntimeConfig};
use crate::device::Device;
use crate::engines::ir::{IrModule, KernelTable, SUPPORTED_OPS, bind_columns};
use crate::error::InferError;
use crate::graph::Graph;
use crate::style::{AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer};

use super::{into_matrix, into_vector};

/// Container over the name-indexed graph interpreter. Runs on the CPU only;
/// the number of declared graph outputs decides which slot each method
/// reads, so a classification or anomaly graph must declare two.
#[derive(Debug)]
pub struct IrContainer {
    module: IrModule,
    state: ContainerState,
}

impl IrContainer {
    pub fn new(
        module: IrModule,
        style: TaskStyle,
        options: ContainerOptions,
    ) -> Result<Self, InferError> {
        let state = ContainerState::new(style, Device::Cpu, options)?;
        Ok(Self { module, state })
    }

    /// The wrapped engine module.
    pub fn model(&self) -> &IrModule {
        &self.module
    }

    pub fn load(location: &Path, unpack: bool) -> Result<Self, InferError> {
        let dir = bundle::open(location, unpack)?;
        bundle::check_tag(&dir, BackendKind::Ir)?;
        let state = bundle::read_state(&dir)?;
        let graph: Graph = bundle::read_json(&dir, GRAPH_FILE)?;
        let table: KernelTable = bundle::read_json(&dir, KERNELS_FILE)?;
        for op in &table.ops {
            if !SUPPORTED_OPS.contains(&op.as_str()) {
                return Err(InferError::Bundle(format!(
                    "kernel {op:?} is not supported by this runtime"
                )));
            }
        }
        let params = bundle::read_params(&dir)?;
        let module = IrModule::new(graph, params)?;
        bundle::reapply_threads(&state);
        log::info!("loaded ir container from {}", dir.display());
        Ok(Self { module, state })
    }

    fn run_named(
        &self,
        columns: &[ArrayValue],
    ) -> Result<HashMap<String, ArrayD<f32>>, InferError> {
        let bound = bind_columns(
            columns,
            self.module.input_names(),
            self.state.config.max_string_length,
        )?;
        self.module.run(bound)
    }

    fn expect_outputs(&self, n: usize, what: &str) -> Result<(), InferError> {
        let found = self.module.output_names().len();
        if found != n {
            return Err(InferError::InvalidInput(format!(
                "a {what} model declares {found} outputs, expected {n}"
            )));
        }
        Ok(())
    }

    fn output_name(&self, index: usize) -> &str {
        &self.module.output_names()[index]
    }
}

fn take(
    outputs: &mut HashMap<String, ArrayD<f32>>,
    name: &str,
) -> Result<ArrayD<f32>, InferError> {
    outputs
        .remove(name)
        .ok_or_else(|| InferError::Compute(format!("output {name:?} was not produced")))
}

impl Container for IrContainer {
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
        let writer = BundleWriter::create(location, BackendKind::Ir)?;
        writer.write_json(GRAPH_FILE, self.module.graph())?;
        writer.write_json(KERNELS_FILE, &self.module.kernel_table())?;
        writer.write_params(self.module.params())?;
        writer.write_state(&self.state)?;
        let archive = writer.finish()?;
        log::info!("saved ir container to {}", archive.display());
        Ok(archive)
    }
}

impl Transformer for IrContainer {
    fn compute_transform(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        self.expect_outputs(1, "transform")?;
        let mut outputs = self.run_named(columns)?;
        take(&mut outputs, self.output_name(0))
    }
}

impl Predictor for IrContainer {
    fn compute_predict(&mut self, columns: &[ArrayValue]) -> Result<ArrayD<f32>, InferError> {
        match self.state.style {
            TaskStyle::Transform | TaskStyle::Regression => {
                self.expect_outputs(1, "regression")?
            }
            TaskStyle::Classification | TaskStyle::AnomalyDetection => {
                self.expect_outputs(2, "two-headed")?
            }
        }
        let mut outputs = self.run_named(columns)?;
        take(&mut outputs, self.output_name(0))
    }
}

impl Classifier for IrContainer {
    fn compute_predict_proba(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array2<f32>, InferError> {
        self.expect_outputs(2, "classification")?;
        let mut outputs = self.run_named(columns)?;
        into_matrix(take(&mut outputs, self.output_name(1))?)
    }
}

impl AnomalyDetector for IrContainer {
    fn compute_decision_function(
        &mut self,
        columns: &[ArrayValue],
    ) -> Result<Array1<f32>, InferError> {
        self.expect_outputs(2, "anomaly-detection")?;
        let mut outputs = self.run_named(columns)?;
        Ok(into_vector(take(&mut outputs, self.output_name(1))?))
    }
}
