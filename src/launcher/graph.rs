//! Declarative networks executed with candle
//!
//! A network is a JSON model definition listing the declared inputs, the requested
//! outputs and the nodes evaluated in order, plus a safetensors file holding the
//! weights of the parametrized nodes under `<node name>.weight` and `<node name>.bias`.

use super::{ExecutableNetwork, NamedTensors, TensorInfo};
use crate::error::{CocosnetError, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{conv2d, conv2d_no_bias, Activation, Conv2d, Conv2dConfig, VarBuilder};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TensorDecl {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GraphDefinition {
    pub inputs: Vec<TensorDecl>,
    pub outputs: Vec<String>,
    pub nodes: Vec<NodeDef>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub inputs: Vec<String>,
    #[serde(flatten)]
    pub op: Op,
}

fn default_stride() -> usize {
    1
}

fn default_bias() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Conv2d {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default = "default_bias")]
        bias: bool,
    },
    Activation {
        activation: Activation,
    },
    Tanh,
    Concat {
        axis: usize,
    },
    Add,
    UpsampleNearest {
        scale: usize,
    },
}

impl Op {
    fn check_arity(&self, node: &str, arity: usize) -> Result<()> {
        let ok = match self {
            Self::Conv2d { .. } | Self::Activation { .. } | Self::Tanh => arity == 1,
            Self::UpsampleNearest { .. } => arity == 1,
            Self::Add => arity == 2,
            Self::Concat { .. } => arity >= 2,
        };
        if ok {
            Ok(())
        } else {
            Err(CocosnetError::config(format!(
                "node '{}' cannot take {} inputs",
                node, arity
            )))
        }
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Conv(Conv2d),
    Activation(Activation),
    Tanh,
    Concat(usize),
    Add,
    UpsampleNearest(usize),
}

impl Layer {
    fn new(name: &str, op: &Op, vb: &VarBuilder) -> Result<Self> {
        let layer = match op {
            Op::Conv2d {
                in_channels,
                out_channels,
                kernel_size,
                padding,
                stride,
                bias,
            } => {
                let config = Conv2dConfig {
                    padding: *padding,
                    stride: *stride,
                    ..Default::default()
                };
                let vb = vb.pp(name);
                let conv = if *bias {
                    conv2d(*in_channels, *out_channels, *kernel_size, config, vb)?
                } else {
                    conv2d_no_bias(*in_channels, *out_channels, *kernel_size, config, vb)?
                };
                Self::Conv(conv)
            }
            Op::Activation { activation } => Self::Activation(activation.clone()),
            Op::Tanh => Self::Tanh,
            Op::Concat { axis } => Self::Concat(*axis),
            Op::Add => Self::Add,
            Op::UpsampleNearest { scale } => Self::UpsampleNearest(*scale),
        };
        Ok(layer)
    }

    fn forward(&self, inputs: &[&Tensor]) -> Result<Tensor> {
        let output = match self {
            Self::Conv(conv) => conv.forward(inputs[0])?,
            Self::Activation(activation) => activation.forward(inputs[0])?,
            Self::Tanh => inputs[0].tanh()?,
            Self::Concat(axis) => Tensor::cat(inputs, *axis)?,
            Self::Add => inputs[0].broadcast_add(inputs[1])?,
            Self::UpsampleNearest(scale) => {
                let (_, _, h, w) = inputs[0].dims4()?;
                inputs[0].upsample_nearest2d(h * scale, w * scale)?
            }
        };
        Ok(output)
    }
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    inputs: Vec<String>,
    layer: Layer,
}

#[derive(Debug, Clone)]
pub struct GraphNetwork {
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
    nodes: Vec<Node>,
}

impl GraphNetwork {
    pub fn new(definition: &GraphDefinition, vb: VarBuilder) -> Result<Self> {
        let mut known: HashSet<&str> = HashSet::new();
        for input in &definition.inputs {
            if !known.insert(input.name.as_str()) {
                return Err(CocosnetError::config(format!(
                    "input '{}' is declared twice",
                    input.name
                )));
            }
        }

        let mut nodes = Vec::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            node.op.check_arity(&node.name, node.inputs.len())?;
            if let Some(missing) = node.inputs.iter().find(|i| !known.contains(i.as_str())) {
                return Err(CocosnetError::UnknownTensor(missing.clone()));
            }
            if !known.insert(node.name.as_str()) {
                return Err(CocosnetError::config(format!(
                    "tensor '{}' is produced twice",
                    node.name
                )));
            }
            nodes.push(Node {
                name: node.name.clone(),
                inputs: node.inputs.clone(),
                layer: Layer::new(&node.name, &node.op, &vb)?,
            });
        }

        if let Some(missing) = definition
            .outputs
            .iter()
            .find(|o| !known.contains(o.as_str()))
        {
            return Err(CocosnetError::UnknownTensor(missing.clone()));
        }

        let inputs = definition
            .inputs
            .iter()
            .map(|decl| TensorInfo {
                name: decl.name.clone(),
                shape: Some(decl.shape.clone()),
            })
            .collect();
        let outputs = definition
            .outputs
            .iter()
            .map(|name| TensorInfo {
                name: name.clone(),
                shape: None,
            })
            .collect();
        Ok(Self {
            inputs,
            outputs,
            nodes,
        })
    }

    /// load a JSON model definition and its safetensors weights
    pub fn load(model: &Path, weights: &Path, device: &Device) -> Result<Self> {
        debug!("loading model definition {:?}", model);
        let definition: GraphDefinition =
            serde_json::from_str(&std::fs::read_to_string(model)?)?;
        debug!("loading weights {:?}", weights);
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device)? };
        Self::new(&definition, vb)
    }
}

impl ExecutableNetwork for GraphNetwork {
    fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
        let mut values: HashMap<&str, Tensor> = HashMap::new();
        for info in &self.inputs {
            let tensor = inputs
                .get(&info.name)
                .ok_or_else(|| CocosnetError::UnknownTensor(info.name.clone()))?;
            if let Some(shape) = &info.shape {
                if tensor.dims() != shape.as_slice() {
                    return Err(CocosnetError::ShapeMismatch(format!(
                        "input '{}' expects {:?}, got {:?}",
                        info.name,
                        shape,
                        tensor.dims()
                    )));
                }
            }
            values.insert(info.name.as_str(), tensor.clone());
        }

        for node in &self.nodes {
            let args = node
                .inputs
                .iter()
                .map(|name| {
                    values
                        .get(name.as_str())
                        .ok_or_else(|| CocosnetError::UnknownTensor(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            let output = node.layer.forward(&args)?;
            values.insert(node.name.as_str(), output);
        }

        self.outputs
            .iter()
            .map(|info| {
                values
                    .get(info.name.as_str())
                    .map(|t| (info.name.clone(), t.clone()))
                    .ok_or_else(|| CocosnetError::UnknownTensor(info.name.clone()))
            })
            .collect()
    }
}
