use std::collections::HashMap;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use colibri_base::{ArrayValue, encode_strings};

use crate::engines::kernels;
use crate::error::InferError;
use crate::graph::{Graph, Node, OpKind, Params};

/// Kernels a serialized graph relies on; shipped beside the graph so a
/// loader can refuse an artifact it cannot interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelTable {
    pub ops: Vec<String>,
}

pub(crate) const SUPPORTED_OPS: &[&str] =
    &["gemm", "relu", "sigmoid", "softmax", "argmax", "affine", "cast"];

/// Graph-IR runtime: interprets a serialized graph over ndarray buffers with
/// name-indexed inputs and outputs.
///
/// Declared input and output names are extracted once at construction, the
/// way a session wraps a loaded artifact.
#[derive(Debug)]
pub struct IrModule {
    graph: Graph,
    params: Params,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl IrModule {
    pub fn new(graph: Graph, params: Params) -> Result<Self, InferError> {
        graph.validate(&params)?;
        let input_names = graph.inputs.clone();
        let output_names = graph.outputs.clone();
        Ok(Self { graph, params, input_names, output_names })
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    /// Distinct kernels the graph uses, in first-use order.
    pub fn kernel_table(&self) -> KernelTable {
        let mut ops: Vec<String> = Vec::new();
        for node in &self.graph.nodes {
            let mnemonic = node.op.mnemonic().to_string();
            if !ops.contains(&mnemonic) {
                ops.push(mnemonic);
            }
        }
        KernelTable { ops }
    }

    /// Interpret the graph over a name-keyed input list.
    pub fn run(
        &self,
        named_inputs: Vec<(String, ArrayD<f32>)>,
    ) -> Result<HashMap<String, ArrayD<f32>>, InferError> {
        if named_inputs.len() != self.input_names.len() {
            return Err(InferError::InvalidInput(format!(
                "model declares {} inputs, got {}",
                self.input_names.len(),
                named_inputs.len()
            )));
        }
        let mut env: HashMap<String, ArrayD<f32>> = HashMap::new();
        for (name, array) in named_inputs {
            if !self.input_names.contains(&name) {
                return Err(InferError::InvalidInput(format!(
                    "unknown input name {name:?}"
                )));
            }
            env.insert(name, array);
        }
        for node in &self.graph.nodes {
            let value = self.apply(node, &env)?;
            env.insert(node.output.clone(), value);
        }
        let mut outputs = HashMap::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let value = env.get(name).cloned().ok_or_else(|| {
                InferError::Compute(format!("output {name:?} was not produced"))
            })?;
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }

    fn apply(
        &self,
        node: &Node,
        env: &HashMap<String, ArrayD<f32>>,
    ) -> Result<ArrayD<f32>, InferError> {
        match &node.op {
            OpKind::Gemm { weights, bias } => {
                let x = fetch(env, node, 0)?;
                let w = self.param(weights)?;
                let b = match bias {
                    Some(name) => Some(self.param(name)?),
                    None => None,
                };
                kernels::gemm(x, w, b)
            }
            OpKind::Relu => Ok(kernels::relu(fetch(env, node, 0)?)),
            OpKind::Sigmoid => Ok(kernels::sigmoid(fetch(env, node, 0)?)),
            OpKind::Softmax => kernels::softmax(fetch(env, node, 0)?),
            OpKind::ArgMax => kernels::argmax(fetch(env, node, 0)?),
            OpKind::Affine { mul, add } => Ok(kernels::affine(fetch(env, node, 0)?, *mul, *add)),
            OpKind::Cast => Ok(fetch(env, node, 0)?.clone()),
        }
    }

    fn param(&self, name: &str) -> Result<&ArrayD<f32>, InferError> {
        self.params.get(name).ok_or_else(|| {
            InferError::Compute(format!("parameter {name:?} is not loaded"))
        })
    }
}

fn fetch<'e>(
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

/// Convert one caller column to the runtime's f32 buffer type, encoding
/// strings first.
pub(crate) fn bind_value(
    column: &ArrayValue,
    max_string_length: Option<usize>,
) -> Result<ArrayD<f32>, InferError> {
    match column {
        ArrayValue::Str(a) => {
            let width = max_string_length.ok_or_else(|| {
                InferError::Config("string inputs require max_string_length".into())
            })?;
            Ok(encode_strings(a, width).mapv(|v| v as f32))
        }
        other => other.to_f32().ok_or_else(|| {
            InferError::InvalidInput(format!(
                "cannot bind a {} column",
                other.kind().as_str()
            ))
        }),
    }
}

/// Pair caller columns with the declared input names.
///
/// A single wide array offered to a multi-input model is split column-wise
/// across the declared slots, one single-column 2-D array per name.
pub(crate) fn bind_columns(
    columns: &[ArrayValue],
    input_names: &[String],
    max_string_length: Option<usize>,
) -> Result<Vec<(String, ArrayD<f32>)>, InferError> {
    if columns.len() == 1 && input_names.len() > 1 {
        let wide = &columns[0];
        if wide.ndim() != 2 || wide.shape()[1] != input_names.len() {
            return Err(InferError::InvalidInput(format!(
                "model declares {} inputs but the single argument has shape {:?}",
                input_names.len(),
                wide.shape()
            )));
        }
        let mut bound = Vec::with_capacity(input_names.len());
        for (index, name) in input_names.iter().enumerate() {
            let column = wide.slice_column(index);
            bound.push((name.clone(), bind_value(&column, max_string_length)?));
        }
        return Ok(bound);
    }
    if columns.len() != input_names.len() {
        return Err(InferError::InvalidInput(format!(
            "model declares {} inputs, got {} columns",
            input_names.len(),
            columns.len()
        )));
    }
    let mut bound = Vec::with_capacity(columns.len());
    for (name, column) in input_names.iter().zip(columns) {
        bound.push((name.clone(), bind_value(column, max_string_length)?));
    }
    Ok(bound)
}
