use std::collections::HashMap;
use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use colibri_base::ArrayValue;

use crate::device::Device;
use crate::engines::kernels;
use crate::error::InferError;
use crate::graph::{Graph, Node, OpKind, Params};

/// Execution context a compiled artifact is bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceContext {
    device: Device,
}

impl DeviceContext {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx({})", self.device)
    }
}

/// An input buffer bound to a device context.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceArray {
    ctx: DeviceContext,
    data: ArrayD<f32>,
}

impl DeviceArray {
    pub fn new(ctx: DeviceContext, data: ArrayD<f32>) -> Self {
        Self { ctx, data }
    }

    pub fn ctx(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }
}

/// One shape-specialized kernel in the compiled library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub name: String,
    pub input_shapes: Vec<Vec<usize>>,
    pub output_shape: Vec<usize>,
}

/// Manifest of the compiled library: the batch size and input widths the
/// artifact was specialized for, plus one kernel per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelLibrary {
    pub batch_size: usize,
    pub input_columns: Vec<usize>,
    pub kernels: Vec<KernelSpec>,
}

/// Ahead-of-time compiled model: every kernel is fixed to the shapes chosen
/// at compile time, so inputs must arrive with exactly the compiled batch
/// size.
///
/// Execution is two-phase like a packed runtime: [`AotModule::run`] binds
/// inputs and fills the output slots, [`AotModule::get_output`] reads them.
#[derive(Debug)]
pub struct AotModule {
    graph: Graph,
    params: Params,
    library: KernelLibrary,
    ctx: DeviceContext,
    outputs: Vec<ArrayD<f32>>,
}

impl AotModule {
    /// Specialize a graph to a fixed batch size and per-input column widths.
    pub fn compile(
        graph: Graph,
        params: Params,
        batch_size: usize,
        input_columns: Vec<usize>,
        ctx: DeviceContext,
    ) -> Result<Self, InferError> {
        graph.validate(&params)?;
        if batch_size == 0 {
            return Err(InferError::InvalidInput("batch size must be nonzero".into()));
        }
        if input_columns.len() != graph.inputs.len() {
            return Err(InferError::InvalidInput(format!(
                "graph takes {} inputs, got {} column widths",
                graph.inputs.len(),
                input_columns.len()
            )));
        }
        let kernels = specialize(&graph, &params, batch_size, &input_columns)?;
        let library = KernelLibrary { batch_size, input_columns, kernels };
        log::debug!(
            "specialized {} kernels for batch size {} on {}",
            library.kernels.len(),
            library.batch_size,
            ctx
        );
        Ok(Self { graph, params, library, ctx, outputs: Vec::new() })
    }

    /// Rebuild a module from a saved library manifest.
    pub fn with_library(
        graph: Graph,
        params: Params,
        library: KernelLibrary,
        ctx: DeviceContext,
    ) -> Result<Self, InferError> {
        let rebuilt = Self::compile(
            graph,
            params,
            library.batch_size,
            library.input_columns.clone(),
            ctx,
        )?;
        if rebuilt.library != library {
            return Err(InferError::Bundle(
                "kernel library manifest does not match its graph".into(),
            ));
        }
        Ok(rebuilt)
    }

    pub fn batch_size(&self) -> usize {
        self.library.batch_size
    }

    pub fn ctx(&self) -> &DeviceContext {
        &self.ctx
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    /// Bind one caller column to the runtime's array type.
    ///
    /// Panics when the row count differs from the compiled batch size; the
    /// artifact physically cannot run any other shape.
    pub fn to_device_array(&self, column: &ArrayValue) -> Result<DeviceArray, InferError> {
        let rows = column.rows();
        let batch = self.library.batch_size;
        assert!(
            rows == batch,
            "input has {rows} rows but the model is compiled for batch size {batch}"
        );
        let data = column.to_f32().ok_or_else(|| {
            InferError::InvalidInput("string inputs are not supported by the aot engine".into())
        })?;
        Ok(DeviceArray { ctx: self.ctx.clone(), data })
    }

    /// Execute the kernel program; read results with [`AotModule::get_output`].
    pub fn run(&mut self, inputs: Vec<DeviceArray>) -> Result<(), InferError> {
        if inputs.len() != self.graph.inputs.len() {
            return Err(InferError::InvalidInput(format!(
                "model takes {} inputs, got {}",
                self.graph.inputs.len(),
                inputs.len()
            )));
        }
        let mut env: HashMap<String, ArrayD<f32>> = HashMap::new();
        for (name, array) in self.graph.inputs.iter().zip(inputs) {
            if array.ctx != self.ctx {
                return Err(InferError::InvalidInput(format!(
                    "input {name:?} is bound to {} but the module runs on {}",
                    array.ctx, self.ctx
                )));
            }
            env.insert(name.clone(), array.data);
        }
        for (node, kernel) in self.graph.nodes.iter().zip(&self.library.kernels) {
            let value = dispatch(node, kernel, &self.params, &env)?;
            env.insert(node.output.clone(), value);
        }
        let mut outputs = Vec::with_capacity(self.graph.outputs.len());
        for name in &self.graph.outputs {
            let value = env.get(name).cloned().ok_or_else(|| {
                InferError::Compute(format!("output {name:?} was not produced"))
            })?;
            outputs.push(value);
        }
        self.outputs = outputs;
        Ok(())
    }

    /// Output slot `index` from the last [`AotModule::run`].
    pub fn get_output(&self, index: usize) -> Result<ArrayD<f32>, InferError> {
        self.outputs.get(index).cloned().ok_or_else(|| {
            InferError::Compute(format!("no output in slot {index}"))
        })
    }
}

/// Walk the graph once with fixed input shapes, recording one kernel per
/// node.
fn specialize(
    graph: &Graph,
    params: &Params,
    batch_size: usize,
    input_columns: &[usize],
) -> Result<Vec<KernelSpec>, InferError> {
    let mut shapes: HashMap<&str, Vec<usize>> = HashMap::new();
    for (name, columns) in graph.inputs.iter().zip(input_columns) {
        shapes.insert(name.as_str(), vec![batch_size, *columns]);
    }
    let mut specs = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let mut input_shapes = Vec::with_capacity(node.inputs.len());
        for name in &node.inputs {
            let shape = shapes.get(name.as_str()).cloned().ok_or_else(|| {
                InferError::Compute(format!("no compiled shape for value {name:?}"))
            })?;
            input_shapes.push(shape);
        }
        let output_shape = infer_output_shape(node, params, &input_shapes)?;
        shapes.insert(node.output.as_str(), output_shape.clone());
        specs.push(KernelSpec {
            name: node.op.mnemonic().to_string(),
            input_shapes,
            output_shape,
        });
    }
    Ok(specs)
}

fn infer_output_shape(
    node: &Node,
    params: &Params,
    input_shapes: &[Vec<usize>],
) -> Result<Vec<usize>, InferError> {
    let first = input_shapes.first().ok_or_else(|| {
        InferError::Compute(format!("node {:?} has no inputs", node.output))
    })?;
    match &node.op {
        OpKind::Gemm { weights, .. } => {
            let w = params.get(weights).ok_or_else(|| {
                InferError::Compute(format!("parameter {weights:?} is not loaded"))
            })?;
            let w_shape = w.shape();
            if first.len() != 2 || w_shape.len() != 2 || first[1] != w_shape[0] {
                return Err(InferError::Compute(format!(
                    "gemm shape mismatch at {:?}: input {:?} vs weights {:?}",
                    node.output, first, w_shape
                )));
            }
            Ok(vec![first[0], w_shape[1]])
        }
        OpKind::ArgMax => {
            if first.len() != 2 {
                return Err(InferError::Compute(format!(
                    "argmax at {:?} needs a 2-D input, got {:?}",
                    node.output, first
                )));
            }
            Ok(vec![first[0]])
        }
        _ => Ok(first.clone()),
    }
}

/// Run one node through its specialized kernel, holding it to the compiled
/// shapes on both sides.
fn dispatch(
    node: &Node,
    kernel: &KernelSpec,
    params: &Params,
    env: &HashMap<String, ArrayD<f32>>,
) -> Result<ArrayD<f32>, InferError> {
    for (name, expected) in node.inputs.iter().zip(&kernel.input_shapes) {
        let array = env.get(name).ok_or_else(|| {
            InferError::Compute(format!("node {:?} reads unset value {name:?}", node.output))
        })?;
        if array.shape() != expected.as_slice() {
            return Err(InferError::Compute(format!(
                "kernel {:?} was compiled for shape {:?} of {name:?}, got {:?}",
                kernel.name,
                expected,
                array.shape()
            )));
        }
    }
    let value = match &node.op {
        OpKind::Gemm { weights, bias } => {
            let x = env_value(env, node, 0)?;
            let w = params.get(weights).ok_or_else(|| {
                InferError::Compute(format!("parameter {weights:?} is not loaded"))
            })?;
            let b = match bias {
                Some(name) => Some(params.get(name).ok_or_else(|| {
                    InferError::Compute(format!("parameter {name:?} is not loaded"))
                })?),
                None => None,
            };
            kernels::gemm(x, w, b)?
        }
        OpKind::Relu => kernels::relu(env_value(env, node, 0)?),
        OpKind::Sigmoid => kernels::sigmoid(env_value(env, node, 0)?),
        OpKind::Softmax => kernels::softmax(env_value(env, node, 0)?)?,
        OpKind::ArgMax => kernels::argmax(env_value(env, node, 0)?)?,
        OpKind::Affine { mul, add } => kernels::affine(env_value(env, node, 0)?, *mul, *add),
        OpKind::Cast => env_value(env, node, 0)?.clone(),
    };
    if value.shape() != kernel.output_shape.as_slice() {
        return Err(InferError::Compute(format!(
            "kernel {:?} produced shape {:?}, compiled for {:?}",
            kernel.name,
            value.shape(),
            kernel.output_shape
        )));
    }
    Ok(value)
}

fn env_value<'e>(
    env: &'e HashMap<String, ArrayD<f32>>,
    node: &Node,
    index: usize,
) -> Result<&'e ArrayD<f32>, InferError> {
    let name = node.inputs.get(index).ok_or_else(|| {
        InferError::Compute(format!("node {:?} is missing input {index}", node.output))
    })?;
    env.get(name).ok_or_else(|| {
        InferError::Compute(format!("node {:?} reads unset value {name:?}", node.output))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear() -> (Graph, Params) {
        let mut params = Params::new();
        params.insert("w", array![[2.0f32], [1.0]].into_dyn());
        let graph = Graph {
            inputs: vec!["input".into()],
            outputs: vec!["value".into()],
            nodes: vec![Node {
                op: OpKind::Gemm { weights: "w".into(), bias: None },
                inputs: vec!["input".into()],
                output: "value".into(),
            }],
        };
        (graph, params)
    }

    #[test]
    fn test_compile_records_specialized_shapes() {
        let (graph, params) = linear();
        let module = AotModule::compile(
            graph,
            params,
            4,
            vec![2],
            DeviceContext::new(Device::Cpu),
        )
        .unwrap();
        let library = module.library();
        assert_eq!(library.batch_size, 4);
        assert_eq!(library.kernels.len(), 1);
        assert_eq!(library.kernels[0].name, "gemm");
        assert_eq!(library.kernels[0].input_shapes, vec![vec![4, 2]]);
        assert_eq!(library.kernels[0].output_shape, vec![4, 1]);
    }

    #[test]
    fn test_compile_rejects_width_mismatch() {
        let (graph, params) = linear();
        let result = AotModule::compile(
            graph,
            params,
            4,
            vec![3],
            DeviceContext::new(Device::Cpu),
        );
        assert!(matches!(result, Err(InferError::Compute(_))));
    }

    #[test]
    fn test_run_and_get_output() {
        let (graph, params) = linear();
        let mut module = AotModule::compile(
            graph,
            params,
            2,
            vec![2],
            DeviceContext::new(Device::Cpu),
        )
        .unwrap();
        let input = module
            .to_device_array(&ArrayValue::from(array![[1.0f32, 1.0], [3.0, 0.0]]))
            .unwrap();
        module.run(vec![input]).unwrap();
        let out = module.get_output(0).unwrap();
        assert_eq!(out, array![[3.0f32], [6.0]].into_dyn());
        assert!(module.get_output(1).is_err());
    }

    #[test]
    #[should_panic(expected = "compiled for batch size")]
    fn test_to_device_array_asserts_batch_size() {
        let (graph, params) = linear();
        let module = AotModule::compile(
            graph,
            params,
            4,
            vec![2],
            DeviceContext::new(Device::Cpu),
        )
        .unwrap();
        let _ = module.to_device_array(&ArrayValue::from(array![[1.0f32, 1.0]]));
    }
}
