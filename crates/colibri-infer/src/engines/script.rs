use std::collections::HashMap;

use candle_core::{D, DType, Tensor};
use serde::{Deserialize, Serialize};

use colibri_base::{ArrayValue, encode_strings};

use crate::device::Device;
use crate::error::InferError;
use crate::graph::{Graph, OpKind, Params};

/// Opcode of one register-machine instruction.
///
/// `Gemm` reads its weights (and optional bias) from constant registers, so
/// operand counts vary: `[x, w]` or `[x, w, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScriptOp {
    Gemm,
    Relu,
    Sigmoid,
    Softmax,
    ArgMax,
    Affine { mul: f32, add: f32 },
    Cast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub op: ScriptOp,
    pub srcs: Vec<usize>,
    pub dst: usize,
}

/// Linearized form of a [`Graph`]: registers instead of value names.
///
/// Register layout: graph inputs first, then one constant register per
/// distinct parameter, then one register per instruction result. `consts`
/// lists `(register, parameter name)` pairs so parameters can be re-attached
/// after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptProgram {
    pub registers: usize,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    pub consts: Vec<(usize, String)>,
    pub instrs: Vec<Instr>,
}

/// Lower a graph to register bytecode without attaching parameters.
pub fn lower(graph: &Graph) -> Result<ScriptProgram, InferError> {
    let mut next_reg = 0usize;
    let mut values: HashMap<&str, usize> = HashMap::new();
    let mut inputs = Vec::with_capacity(graph.inputs.len());
    for name in &graph.inputs {
        values.insert(name.as_str(), next_reg);
        inputs.push(next_reg);
        next_reg += 1;
    }

    let mut param_regs: HashMap<&str, usize> = HashMap::new();
    let mut consts: Vec<(usize, String)> = Vec::new();
    let mut instrs = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let mut srcs = Vec::with_capacity(node.inputs.len() + 2);
        for name in &node.inputs {
            srcs.push(register_of(&values, name)?);
        }
        let op = match &node.op {
            OpKind::Gemm { weights, bias } => {
                srcs.push(intern_param(&mut param_regs, &mut consts, &mut next_reg, weights));
                if let Some(bias) = bias {
                    srcs.push(intern_param(&mut param_regs, &mut consts, &mut next_reg, bias));
                }
                ScriptOp::Gemm
            }
            OpKind::Relu => ScriptOp::Relu,
            OpKind::Sigmoid => ScriptOp::Sigmoid,
            OpKind::Softmax => ScriptOp::Softmax,
            OpKind::ArgMax => ScriptOp::ArgMax,
            OpKind::Affine { mul, add } => ScriptOp::Affine { mul: *mul, add: *add },
            OpKind::Cast => ScriptOp::Cast,
        };
        let dst = next_reg;
        next_reg += 1;
        values.insert(node.output.as_str(), dst);
        instrs.push(Instr { op, srcs, dst });
    }

    let mut outputs = Vec::with_capacity(graph.outputs.len());
    for name in &graph.outputs {
        outputs.push(register_of(&values, name)?);
    }

    Ok(ScriptProgram { registers: next_reg, inputs, outputs, consts, instrs })
}

fn register_of(values: &HashMap<&str, usize>, name: &str) -> Result<usize, InferError> {
    values.get(name).copied().ok_or_else(|| {
        InferError::Compute(format!("value {name:?} has no register"))
    })
}

fn intern_param<'g>(
    param_regs: &mut HashMap<&'g str, usize>,
    consts: &mut Vec<(usize, String)>,
    next_reg: &mut usize,
    name: &'g str,
) -> usize {
    if let Some(&reg) = param_regs.get(name) {
        return reg;
    }
    let reg = *next_reg;
    *next_reg += 1;
    param_regs.insert(name, reg);
    consts.push((reg, name.to_string()));
    reg
}

/// Bytecode-compiled model executed on candle tensors.
#[derive(Debug)]
pub struct ScriptModule {
    program: ScriptProgram,
    consts: Vec<(usize, Tensor)>,
    device: Device,
    candle_device: candle_core::Device,
}

impl ScriptModule {
    /// Lower a graph and attach its parameters.
    pub fn compile(graph: &Graph, params: &Params, device: Device) -> Result<Self, InferError> {
        graph.validate(params)?;
        let program = lower(graph)?;
        Self::with_program(program, params, device)
    }

    /// Attach parameters to an already-lowered program.
    pub fn with_program(
        program: ScriptProgram,
        params: &Params,
        device: Device,
    ) -> Result<Self, InferError> {
        let candle_device = device.to_candle()?;
        let all = params.to_candle(&candle_device)?;
        let mut consts = Vec::with_capacity(program.consts.len());
        for (reg, name) in &program.consts {
            let tensor = all.get(name).cloned().ok_or_else(|| {
                InferError::Bundle(format!("program constant {name:?} has no parameter tensor"))
            })?;
            consts.push((*reg, tensor));
        }
        let module = Self { program, consts, device, candle_device };
        log::debug!(
            "script module ready: {} instructions on {}",
            module.program.instrs.len(),
            module.device
        );
        Ok(module)
    }

    pub fn program(&self) -> &ScriptProgram {
        &self.program
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub(crate) fn candle_device(&self) -> &candle_core::Device {
        &self.candle_device
    }

    /// Parameters keyed by their original names.
    pub(crate) fn const_params(&self) -> Result<Params, InferError> {
        let mut tensors = HashMap::with_capacity(self.consts.len());
        for ((_, name), (_, tensor)) in self.program.consts.iter().zip(&self.consts) {
            tensors.insert(name.clone(), tensor.clone());
        }
        Params::from_candle(&tensors)
    }

    /// Move the constant registers to another device.
    pub fn to_device(&mut self, device: Device) -> Result<(), InferError> {
        let candle_device = device.to_candle()?;
        for (_, tensor) in self.consts.iter_mut() {
            *tensor = tensor.to_device(&candle_device)?;
        }
        self.device = device;
        self.candle_device = candle_device;
        Ok(())
    }

    /// Run the register program over positional inputs.
    pub fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, InferError> {
        if inputs.len() != self.program.inputs.len() {
            return Err(InferError::InvalidInput(format!(
                "program takes {} inputs, got {}",
                self.program.inputs.len(),
                inputs.len()
            )));
        }
        let mut regs: Vec<Option<Tensor>> = vec![None; self.program.registers];
        for (reg, tensor) in self.program.inputs.iter().zip(inputs) {
            regs[*reg] = Some(tensor);
        }
        for (reg, tensor) in &self.consts {
            regs[*reg] = Some(tensor.clone());
        }
        for instr in &self.program.instrs {
            let value = step(instr, &regs)?;
            regs[instr.dst] = Some(value);
        }
        let mut outputs = Vec::with_capacity(self.program.outputs.len());
        for reg in &self.program.outputs {
            outputs.push(read(&regs, *reg)?.clone());
        }
        Ok(outputs)
    }
}

fn step(instr: &Instr, regs: &[Option<Tensor>]) -> Result<Tensor, InferError> {
    match instr.op {
        ScriptOp::Gemm => {
            let x = src(regs, instr, 0)?;
            let w = src(regs, instr, 1)?;
            let mut out = x.matmul(w)?;
            if instr.srcs.len() > 2 {
                out = out.broadcast_add(src(regs, instr, 2)?)?;
            }
            Ok(out)
        }
        ScriptOp::Relu => Ok(src(regs, instr, 0)?.relu()?),
        ScriptOp::Sigmoid => Ok(candle_nn::ops::sigmoid(src(regs, instr, 0)?)?),
        ScriptOp::Softmax => Ok(candle_nn::ops::softmax(src(regs, instr, 0)?, D::Minus1)?),
        ScriptOp::ArgMax => Ok(src(regs, instr, 0)?
            .argmax(D::Minus1)?
            .to_dtype(DType::F32)?),
        ScriptOp::Affine { mul, add } => {
            Ok(src(regs, instr, 0)?.affine(f64::from(mul), f64::from(add))?)
        }
        ScriptOp::Cast => Ok(src(regs, instr, 0)?.to_dtype(DType::F32)?),
    }
}

fn src<'r>(
    regs: &'r [Option<Tensor>],
    instr: &Instr,
    index: usize,
) -> Result<&'r Tensor, InferError> {
    let reg = instr.srcs.get(index).copied().ok_or_else(|| {
        InferError::Compute(format!(
            "instruction for register {} is missing operand {index}",
            instr.dst
        ))
    })?;
    read(regs, reg)
}

fn read<'r>(regs: &'r [Option<Tensor>], reg: usize) -> Result<&'r Tensor, InferError> {
    regs.get(reg).and_then(|r| r.as_ref()).ok_or_else(|| {
        InferError::Compute(format!("register {reg} read before it was written"))
    })
}

/// Coerce caller columns to what a compiled program expects: f64 narrows to
/// f32 (build-time precision), i32 widens to i64, strings encode to
/// fixed-width i64 rows. Runs before every public call.
pub(crate) fn coerce_inputs(
    columns: &[ArrayValue],
    max_string_length: Option<usize>,
) -> Result<Vec<ArrayValue>, InferError> {
    columns
        .iter()
        .map(|column| match column {
            ArrayValue::F64(a) => Ok(ArrayValue::F32(a.mapv(|v| v as f32))),
            ArrayValue::I32(a) => Ok(ArrayValue::I64(a.mapv(i64::from))),
            ArrayValue::Str(a) => {
                let width = max_string_length.ok_or_else(|| {
                    InferError::Config("string inputs require max_string_length".into())
                })?;
                Ok(ArrayValue::I64(encode_strings(a, width)))
            }
            other => Ok(other.clone()),
        })
        .collect()
}
