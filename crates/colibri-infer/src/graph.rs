use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::InferError;

/// Operator vocabulary shared by every engine.
///
/// `Gemm` names entries in the parameter store; the other operators work on
/// their single value input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Gemm { weights: String, bias: Option<String> },
    Relu,
    Sigmoid,
    Softmax,
    ArgMax,
    Affine { mul: f32, add: f32 },
    Cast,
}

impl OpKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpKind::Gemm { .. } => "gemm",
            OpKind::Relu => "relu",
            OpKind::Sigmoid => "sigmoid",
            OpKind::Softmax => "softmax",
            OpKind::ArgMax => "argmax",
            OpKind::Affine { .. } => "affine",
            OpKind::Cast => "cast",
        }
    }
}

/// One operator application inside a [`Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub op: OpKind,
    pub inputs: Vec<String>,
    pub output: String,
}

/// A compiled model graph: named inputs and outputs plus nodes in
/// topological order.
///
/// A graph output whose name equals an input name passes that input through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub nodes: Vec<Node>,
}

impl Graph {
    /// Check wiring and parameter references before an engine accepts the
    /// graph.
    pub fn validate(&self, params: &Params) -> Result<(), InferError> {
        if self.inputs.is_empty() {
            return Err(InferError::InvalidInput("graph declares no inputs".into()));
        }
        if self.outputs.is_empty() {
            return Err(InferError::InvalidInput("graph declares no outputs".into()));
        }
        let mut known: HashSet<&str> = self.inputs.iter().map(String::as_str).collect();
        for node in &self.nodes {
            for input in &node.inputs {
                if !known.contains(input.as_str()) {
                    return Err(InferError::InvalidInput(format!(
                        "node {:?} reads undefined value {:?}",
                        node.output, input
                    )));
                }
            }
            if let OpKind::Gemm { weights, bias } = &node.op {
                if params.get(weights).is_none() {
                    return Err(InferError::InvalidInput(format!(
                        "missing parameter {weights:?}"
                    )));
                }
                if let Some(bias) = bias {
                    if params.get(bias).is_none() {
                        return Err(InferError::InvalidInput(format!(
                            "missing parameter {bias:?}"
                        )));
                    }
                }
            }
            if !known.insert(node.output.as_str()) {
                return Err(InferError::InvalidInput(format!(
                    "value {:?} is defined twice",
                    node.output
                )));
            }
        }
        for output in &self.outputs {
            if !known.contains(output.as_str()) {
                return Err(InferError::InvalidInput(format!(
                    "graph output {output:?} is never produced"
                )));
            }
        }
        Ok(())
    }
}

/// Named f32 parameter tensors backing a graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArrayD<f32>)> {
        self.tensors.iter().map(|(name, tensor)| (name.as_str(), tensor))
    }

    /// Copy every tensor onto `device` as a candle tensor.
    pub fn to_candle(
        &self,
        device: &candle_core::Device,
    ) -> Result<HashMap<String, candle_core::Tensor>, InferError> {
        let mut tensors = HashMap::with_capacity(self.tensors.len());
        for (name, tensor) in &self.tensors {
            let data: Vec<f32> = tensor.iter().copied().collect();
            tensors.insert(
                name.clone(),
                candle_core::Tensor::from_vec(data, tensor.shape().to_vec(), device)?,
            );
        }
        Ok(tensors)
    }

    /// Copy candle tensors back into a parameter store.
    pub fn from_candle(
        tensors: &HashMap<String, candle_core::Tensor>,
    ) -> Result<Self, InferError> {
        let mut params = Params::new();
        for (name, tensor) in tensors {
            let shape = tensor.dims().to_vec();
            let data = tensor
                .to_dtype(candle_core::DType::F32)?
                .contiguous()?
                .flatten_all()?
                .to_vec1::<f32>()?;
            params.insert(name.clone(), ArrayD::from_shape_vec(IxDyn(&shape), data)?);
        }
        Ok(params)
    }

    /// Write the store as a safetensors file.
    pub fn save_safetensors(&self, path: &Path) -> Result<(), InferError> {
        let cpu = candle_core::Device::Cpu;
        let tensors = self.to_candle(&cpu)?;
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    /// Memory-map a safetensors file and copy the tensors out.
    pub fn load_safetensors(path: &Path) -> Result<Self, InferError> {
        let file = std::fs::File::open(path).map_err(|e| {
            InferError::Bundle(format!("cannot open {}: {e}", path.display()))
        })?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let archive = safetensors::SafeTensors::deserialize(&mmap)?;
        let mut params = Params::new();
        for (name, view) in archive.tensors() {
            if view.dtype() != safetensors::Dtype::F32 {
                return Err(InferError::Bundle(format!(
                    "parameter {name:?} has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }
            let mut data = Vec::with_capacity(view.data().len() / 4);
            for chunk in view.data().chunks_exact(4) {
                data.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
            let tensor = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
                .map_err(|e| InferError::Bundle(format!("parameter {name:?}: {e}")))?;
            params.insert(name, tensor);
        }
        Ok(params)
    }
}
