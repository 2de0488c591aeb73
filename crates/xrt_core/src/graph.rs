//! Computation IR.
//!
//! A [`Computation`] is a typed, topologically ordered list of [`Node`]s with
//! numbered parameters and a single root. It is the unit that gets compiled:
//! the server re-verifies it, fingerprints it and keeps it in its cache.

use crate::error::{XrtError, XrtResult};
use crate::infer::infer_type;
use crate::literal::Literal;
use crate::types::{DType, Shape, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Computation-local node id; equal to the node's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Relu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Stride and symmetric zero padding of a 2-D convolution, as `[h, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conv2dParams {
    pub stride: [usize; 2],
    pub padding: [usize; 2],
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: [1, 1],
            padding: [0, 0],
        }
    }
}

/// Operation of a node. Operands are positional and listed on the [`Node`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Parameter { index: usize },
    Constant { value: Literal },
    /// Uniform samples in `[lo, hi)`; operands `(lo, hi)` are scalars.
    RngUniform { shape: Shape },
    Unary { kind: UnaryOp },
    /// Element-wise with numpy-style broadcasting.
    Binary { kind: BinaryOp },
    Compare { kind: CompareOp },
    /// Operands `(pred, on_true, on_false)`, broadcast together.
    Select,
    Convert { dtype: DType },
    Reshape { shape: Shape },
    BroadcastTo { shape: Shape },
    Transpose { perm: Vec<usize> },
    ReduceSum { axes: Vec<usize> },
    ReduceMax { axes: Vec<usize> },
    /// Rank-2 matrix product.
    Dot,
    /// Operands `(operand, indices)`; selects along `axis` with a rank-1 index vector.
    Gather { axis: usize },
    Tile { reps: Vec<usize> },
    /// NCHW input, OIHW filter.
    Conv2d { params: Conv2dParams },
    /// Operands `(grad_output, filter)`.
    Conv2dBackpropInput { input_shape: Shape, params: Conv2dParams },
    /// Operands `(input, grad_output)`.
    Conv2dBackpropFilter { filter_shape: Shape, params: Conv2dParams },
    MaxPool2d { window: [usize; 2], stride: [usize; 2] },
    Tuple,
    GetTupleElement { index: usize },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parameter { .. } => "parameter",
            Self::Constant { .. } => "constant",
            Self::RngUniform { .. } => "rng_uniform",
            Self::Unary { kind } => match kind {
                UnaryOp::Neg => "neg",
                UnaryOp::Exp => "exp",
                UnaryOp::Log => "log",
                UnaryOp::Sqrt => "sqrt",
                UnaryOp::Tanh => "tanh",
                UnaryOp::Relu => "relu",
            },
            Self::Binary { kind } => match kind {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::Div => "div",
                BinaryOp::Max => "max",
                BinaryOp::Min => "min",
            },
            Self::Compare { kind } => match kind {
                CompareOp::Eq => "eq",
                CompareOp::Ne => "ne",
                CompareOp::Lt => "lt",
                CompareOp::Le => "le",
                CompareOp::Gt => "gt",
                CompareOp::Ge => "ge",
            },
            Self::Select => "select",
            Self::Convert { .. } => "convert",
            Self::Reshape { .. } => "reshape",
            Self::BroadcastTo { .. } => "broadcast_to",
            Self::Transpose { .. } => "transpose",
            Self::ReduceSum { .. } => "reduce_sum",
            Self::ReduceMax { .. } => "reduce_max",
            Self::Dot => "dot",
            Self::Gather { .. } => "gather",
            Self::Tile { .. } => "tile",
            Self::Conv2d { .. } => "conv2d",
            Self::Conv2dBackpropInput { .. } => "conv2d_backprop_input",
            Self::Conv2dBackpropFilter { .. } => "conv2d_backprop_filter",
            Self::MaxPool2d { .. } => "max_pool2d",
            Self::Tuple => "tuple",
            Self::GetTupleElement { .. } => "get_tuple_element",
        }
    }

    fn attributes(&self) -> String {
        match self {
            Self::Parameter { index } => format!("{}", index),
            Self::Constant { value } => format!("{:?}", value),
            Self::RngUniform { shape } | Self::Reshape { shape } | Self::BroadcastTo { shape } => {
                format!("shape={}", shape)
            },
            Self::Convert { dtype } => format!("dtype={}", dtype),
            Self::Transpose { perm } => format!("perm={:?}", perm),
            Self::ReduceSum { axes } | Self::ReduceMax { axes } => format!("axes={:?}", axes),
            Self::Gather { axis } => format!("axis={}", axis),
            Self::Tile { reps } => format!("reps={:?}", reps),
            Self::Conv2d { params } => format!("stride={:?} padding={:?}", params.stride, params.padding),
            Self::Conv2dBackpropInput { input_shape, params } => format!(
                "input_shape={} stride={:?} padding={:?}",
                input_shape, params.stride, params.padding
            ),
            Self::Conv2dBackpropFilter { filter_shape, params } => format!(
                "filter_shape={} stride={:?} padding={:?}",
                filter_shape, params.stride, params.padding
            ),
            Self::MaxPool2d { window, stride } => format!("window={:?} stride={:?}", window, stride),
            Self::GetTupleElement { index } => format!("index={}", index),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    pub operands: Vec<NodeId>,
    pub ty: ValueType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub index: usize,
    pub name: String,
    pub id: NodeId,
    pub ty: ValueType,
}

/// A traced function, ready to compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
    pub name: String,
    /// Sorted by index; indices are `0..parameters.len()`.
    pub parameters: Vec<ParameterSpec>,
    pub nodes: Vec<Node>,
    pub root: NodeId,
}

impl Computation {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn parameter_types(&self) -> Vec<ValueType> {
        self.parameters.iter().map(|p| p.ty.clone()).collect()
    }

    pub fn result_type(&self) -> XrtResult<&ValueType> {
        self.node(self.root)
            .map(|n| &n.ty)
            .ok_or_else(|| XrtError::InvalidGraph(format!("root {} not found", self.root)))
    }

    /// Check structure and re-derive every node type.
    ///
    /// Node ids must equal positions, operands must precede their users,
    /// parameter specs must match their nodes and be numbered `0..n`, and
    /// constants must hold exactly as many bytes as their type needs.
    pub fn verify(&self) -> XrtResult<()> {
        for (i, param) in self.parameters.iter().enumerate() {
            if param.index != i {
                return Err(XrtError::InvalidGraph(format!(
                    "parameter indices must be contiguous from 0, found {} at position {}",
                    param.index, i
                )));
            }
            let node = self
                .node(param.id)
                .ok_or_else(|| XrtError::InvalidGraph(format!("parameter {} has no node", i)))?;
            if node.op != (Op::Parameter { index: i }) || node.ty != param.ty {
                return Err(XrtError::InvalidGraph(format!("parameter {} does not match node {}", i, node.id)));
            }
        }

        for (pos, node) in self.nodes.iter().enumerate() {
            if node.id.0 != pos {
                return Err(XrtError::InvalidGraph(format!("node {} stored at position {}", node.id, pos)));
            }

            let mut operand_types = Vec::with_capacity(node.operands.len());
            for operand in &node.operands {
                if operand.0 >= pos {
                    return Err(XrtError::InvalidGraph(format!(
                        "node {} uses {} before it is defined",
                        node.id, operand
                    )));
                }
                operand_types.push(&self.nodes[operand.0].ty);
            }

            if let Op::Constant { value } = &node.op {
                let expected = value.element_count() * value.dtype().size_in_bytes();
                if value.data().len() != expected {
                    return Err(XrtError::SizeMismatch {
                        expected,
                        got: value.data().len(),
                    });
                }
            }

            let inferred = match &node.op {
                Op::Parameter { index } => {
                    let spec = self.parameters.get(*index).ok_or_else(|| {
                        XrtError::InvalidGraph(format!("node {} refers to unknown parameter {}", node.id, index))
                    })?;
                    if spec.id != node.id {
                        return Err(XrtError::InvalidGraph(format!("duplicate parameter {}", index)));
                    }
                    spec.ty.clone()
                },
                op => infer_type(op, &operand_types)?,
            };

            if inferred != node.ty {
                return Err(XrtError::TypeMismatch {
                    expected: inferred,
                    got: node.ty.clone(),
                });
            }
        }

        self.result_type()?;
        Ok(())
    }

    pub fn to_json(&self) -> XrtResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> XrtResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for Computation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "computation {}(", self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        match self.result_type() {
            Ok(ty) => writeln!(f, ") -> {} {{", ty)?,
            Err(_) => writeln!(f, ") {{")?,
        }

        for node in &self.nodes {
            write!(f, "  {} = {}", node.id, node.op.name())?;
            let attrs = node.op.attributes();
            if !attrs.is_empty() {
                write!(f, "[{}]", attrs)?;
            }
            for (i, operand) in node.operands.iter().enumerate() {
                write!(f, "{}{}", if i == 0 { " " } else { ", " }, operand)?;
            }
            writeln!(f, " : {}", node.ty)?;
        }

        writeln!(f, "  ROOT {}", self.root)?;
        write!(f, "}}")
    }
}
