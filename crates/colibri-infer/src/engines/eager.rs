use std::collections::HashMap;

use candle_core::{D, DType, Tensor};

use crate::device::Device;
use crate::error::InferError;
use crate::graph::{Graph, Node, OpKind, Params};

/// Eagerly walked operator graph on candle tensors.
///
/// Parameters live on the module's device; every forward call walks the node
/// list in order and keeps intermediate values in a scratch environment.
#[derive(Debug)]
pub struct EagerModule {
    graph: Graph,
    params: HashMap<String, Tensor>,
    device: Device,
    candle_device: candle_core::Device,
}

impl EagerModule {
    pub fn new(graph: Graph, params: &Params, device: Device) -> Result<Self, InferError> {
        graph.validate(params)?;
        let candle_device = device.to_candle()?;
        let params = params.to_candle(&candle_device)?;
        let module = Self { graph, params, device, candle_device };
        log::debug!(
            "eager module ready: {} nodes on {}",
            module.graph.nodes.len(),
            module.device
        );
        Ok(module)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn candle_device(&self) -> &candle_core::Device {
        &self.candle_device
    }

    pub(crate) fn params(&self) -> &HashMap<String, Tensor> {
        &self.params
    }

    /// Move the parameters to another device.
    pub fn to_device(&mut self, device: Device) -> Result<(), InferError> {
        let candle_device = device.to_candle()?;
        for tensor in self.params.values_mut() {
            *tensor = tensor.to_device(&candle_device)?;
        }
        self.device = device;
        self.candle_device = candle_device;
        Ok(())
    }

    /// Walk the graph over positional inputs; outputs come back in declared
    /// order.
    pub fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, InferError> {
        if inputs.len() != self.graph.inputs.len() {
            return Err(InferError::InvalidInput(format!(
                "model takes {} inputs, got {}",
                self.graph.inputs.len(),
                inputs.len()
            )));
        }
        let mut env: HashMap<&str, Tensor> = HashMap::new();
        for (name, tensor) in self.graph.inputs.iter().zip(inputs) {
            env.insert(name.as_str(), tensor);
        }
        for node in &self.graph.nodes {
            let value = self.apply(node, &env)?;
            env.insert(node.output.as_str(), value);
        }
        let mut outputs = Vec::with_capacity(self.graph.outputs.len());
        for name in &self.graph.outputs {
            let tensor = env.get(name.as_str()).ok_or_else(|| {
                InferError::Compute(format!("output {name:?} was not produced"))
            })?;
            outputs.push(tensor.clone());
        }
        Ok(outputs)
    }

    fn apply(&self, node: &Node, env: &HashMap<&str, Tensor>) -> Result<Tensor, InferError> {
        match &node.op {
            OpKind::Gemm { weights, bias } => {
                let x = node_input(node, env, 0)?;
                let mut out = x.matmul(self.param(weights)?)?;
                if let Some(bias) = bias {
                    out = out.broadcast_add(self.param(bias)?)?;
                }
                Ok(out)
            }
            OpKind::Relu => Ok(node_input(node, env, 0)?.relu()?),
            OpKind::Sigmoid => Ok(candle_nn::ops::sigmoid(node_input(node, env, 0)?)?),
            OpKind::Softmax => Ok(candle_nn::ops::softmax(node_input(node, env, 0)?, D::Minus1)?),
            OpKind::ArgMax => Ok(node_input(node, env, 0)?
                .argmax(D::Minus1)?
                .to_dtype(DType::F32)?),
            OpKind::Affine { mul, add } => {
                Ok(node_input(node, env, 0)?.affine(f64::from(*mul), f64::from(*add))?)
            }
            OpKind::Cast => Ok(node_input(node, env, 0)?.to_dtype(DType::F32)?),
        }
    }

    fn param(&self, name: &str) -> Result<&Tensor, InferError> {
        self.params.get(name).ok_or_else(|| {
            InferError::Compute(format!("parameter {name:?} is not loaded"))
        })
    }
}

fn node_input<'e>(
    node: &Node,
    env: &'e HashMap<&str, Tensor>,
    index: usize,
) -> Result<&'e Tensor, InferError> {
    let name = node.inputs.get(index).ok_or_else(|| {
        InferError::Compute(format!("node {:?} is missing input {index}", node.output))
    })?;
    env.get(name.as_str()).ok_or_else(|| {
        InferError::Compute(format!("node {:?} reads unset value {name:?}", node.output))
    })
}
