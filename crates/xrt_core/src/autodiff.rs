//! Reverse-mode differentiation over traced graphs.
//!
//! A single backward pass is seeded with a scalar `1` at the loss and walks
//! the builder's nodes in reverse, appending the gradient computation to the
//! same graph. Tuple-typed values carry one cotangent per element so a
//! gradient with respect to a nested parameter structure comes back with the
//! same structure.

use crate::builder::{GraphBuilder, Traced};
use crate::error::{XrtError, XrtResult};
use crate::graph::{BinaryOp, Node, NodeId, Op, UnaryOp};
use crate::literal::Literal;
use crate::types::{Shape, ValueType};
use std::collections::HashMap;

/// Cotangent of a node: a tensor, or one optional entry per tuple element.
#[derive(Clone)]
enum Cotangent {
    Tensor(Traced),
    Tuple(Vec<Option<Cotangent>>),
}

impl Cotangent {
    fn tensor(&self) -> XrtResult<&Traced> {
        match self {
            Cotangent::Tensor(t) => Ok(t),
            Cotangent::Tuple(_) => Err(XrtError::GradientComputationFailed(
                "tuple cotangent reached a tensor-valued op".into(),
            )),
        }
    }

    fn accumulate(self, other: Cotangent) -> XrtResult<Cotangent> {
        match (self, other) {
            (Cotangent::Tensor(a), Cotangent::Tensor(b)) => Ok(Cotangent::Tensor(a.add(&b)?)),
            (Cotangent::Tuple(a), Cotangent::Tuple(b)) if a.len() == b.len() => {
                let merged = a
                    .into_iter()
                    .zip(b)
                    .map(|pair| match pair {
                        (Some(x), Some(y)) => x.accumulate(y).map(Some),
                        (x, y) => Ok(x.or(y)),
                    })
                    .collect::<XrtResult<_>>()?;
                Ok(Cotangent::Tuple(merged))
            },
            _ => Err(XrtError::GradientComputationFailed(
                "cotangents of different structure".into(),
            )),
        }
    }
}

/// Turn an optional cotangent into a traced value of type `ty`, filling
/// missing leaves with zeros.
fn materialize(builder: &GraphBuilder, cotangent: Option<Cotangent>, ty: &ValueType) -> XrtResult<Traced> {
    match (cotangent, ty) {
        (Some(Cotangent::Tensor(t)), _) => Ok(t),
        (None, ValueType::Tensor(tt)) => Ok(builder.constant(Literal::zeros(tt.dtype, tt.shape.clone()))),
        (slots, ValueType::Tuple(types)) => {
            let mut slots = match slots {
                Some(Cotangent::Tuple(slots)) => slots,
                _ => vec![None; types.len()],
            };
            slots.resize(types.len(), None);
            let elements = slots
                .into_iter()
                .zip(types)
                .map(|(slot, ty)| materialize(builder, slot, ty))
                .collect::<XrtResult<Vec<_>>>()?;
            builder.tuple(&elements.iter().collect::<Vec<_>>())
        },
        (Some(Cotangent::Tuple(_)), ValueType::Tensor(_)) => Err(XrtError::GradientComputationFailed(
            "tuple cotangent for a tensor value".into(),
        )),
    }
}

/// Sum `ct` down to `shape`, undoing numpy broadcasting.
fn unbroadcast(ct: &Traced, shape: &Shape) -> XrtResult<Traced> {
    let ct_shape = ct.shape()?.clone();
    if &ct_shape == shape {
        return Ok(ct.clone());
    }
    let lead = ct_shape.ndim() - shape.ndim();
    let mut axes: Vec<usize> = (0..lead).collect();
    for (i, &d) in shape.dims().iter().enumerate() {
        if d == 1 && ct_shape.dims()[i + lead] != 1 {
            axes.push(i + lead);
        }
    }
    ct.sum(&axes)?.reshape(shape.clone())
}

fn zero_like(t: &Traced) -> XrtResult<Traced> {
    t.scalar_like(0.0)
}

/// Vector-Jacobian product of one op kind.
trait Vjp {
    /// Cotangents for each operand, `None` where the operand gets no gradient.
    fn vjp(&self, inputs: &[Traced], output: &Traced, ct: &Traced) -> XrtResult<Vec<Option<Traced>>>;
}

impl Vjp for UnaryOp {
    fn vjp(&self, inputs: &[Traced], output: &Traced, ct: &Traced) -> XrtResult<Vec<Option<Traced>>> {
        let x = &inputs[0];
        let dx = match self {
            UnaryOp::Neg => ct.neg()?,
            // d/dx exp(x) = exp(x)
            UnaryOp::Exp => ct.mul(output)?,
            UnaryOp::Log => ct.div(x)?,
            // d/dx sqrt(x) = 1 / (2 sqrt(x))
            UnaryOp::Sqrt => ct.div(&output.mul_scalar(2.0)?)?,
            // d/dx tanh(x) = 1 - tanh^2(x)
            UnaryOp::Tanh => {
                let one = output.scalar_like(1.0)?;
                ct.mul(&one.sub(&output.mul(output)?)?)?
            },
            // d/dx relu(x) = 1 if x > 0, else 0
            UnaryOp::Relu => {
                let mask = x.gt(&zero_like(x)?)?;
                mask.select(ct, &zero_like(ct)?)?
            },
        };
        Ok(vec![Some(dx)])
    }
}

impl Vjp for BinaryOp {
    fn vjp(&self, inputs: &[Traced], output: &Traced, ct: &Traced) -> XrtResult<Vec<Option<Traced>>> {
        let (x, y) = (&inputs[0], &inputs[1]);
        let (dx, dy) = match self {
            BinaryOp::Add => (ct.clone(), ct.clone()),
            BinaryOp::Sub => (ct.clone(), ct.neg()?),
            BinaryOp::Mul => (ct.mul(y)?, ct.mul(x)?),
            // d/dy x/y = -x/y^2 = -out/y
            BinaryOp::Div => (ct.div(y)?, ct.mul(output)?.div(y)?.neg()?),
            BinaryOp::Max | BinaryOp::Min => {
                let mask = if *self == BinaryOp::Max { x.ge(y)? } else { x.le(y)? };
                let zero = zero_like(ct)?;
                (mask.select(ct, &zero)?, mask.select(&zero, ct)?)
            },
        };
        Ok(vec![
            Some(unbroadcast(&dx, x.shape()?)?),
            Some(unbroadcast(&dy, y.shape()?)?),
        ])
    }
}

impl Vjp for Op {
    fn vjp(&self, inputs: &[Traced], output: &Traced, ct: &Traced) -> XrtResult<Vec<Option<Traced>>> {
        match self {
            Op::Unary { kind } => kind.vjp(inputs, output, ct),
            Op::Binary { kind } => kind.vjp(inputs, output, ct),
            Op::Compare { .. } => Ok(vec![None, None]),
            Op::Select => {
                let (pred, on_true, on_false) = (&inputs[0], &inputs[1], &inputs[2]);
                let zero = zero_like(ct)?;
                Ok(vec![
                    None,
                    Some(unbroadcast(&pred.select(ct, &zero)?, on_true.shape()?)?),
                    Some(unbroadcast(&pred.select(&zero, ct)?, on_false.shape()?)?),
                ])
            },
            Op::Convert { .. } => {
                let x = &inputs[0];
                if !x.dtype()?.is_float() || !ct.dtype()?.is_float() {
                    return Ok(vec![None]);
                }
                Ok(vec![Some(ct.convert(x.dtype()?)?)])
            },
            Op::Reshape { .. } => Ok(vec![Some(ct.reshape(inputs[0].shape()?.clone())?)]),
            Op::BroadcastTo { .. } => Ok(vec![Some(unbroadcast(ct, inputs[0].shape()?)?)]),
            Op::Transpose { perm } => {
                let mut inverse = vec![0; perm.len()];
                for (i, &p) in perm.iter().enumerate() {
                    inverse[p] = i;
                }
                Ok(vec![Some(ct.transpose(&inverse)?)])
            },
            Op::ReduceSum { axes } => {
                let x_shape = inputs[0].shape()?;
                let kept = ct.reshape(x_shape.with_unit_axes(axes))?;
                Ok(vec![Some(kept.broadcast_to(x_shape.clone())?)])
            },
            // d/dA (A B) = G B^T, d/dB (A B) = A^T G
            Op::Dot => {
                let (a, b) = (&inputs[0], &inputs[1]);
                Ok(vec![
                    Some(ct.dot(&b.transpose(&[1, 0])?)?),
                    Some(a.transpose(&[1, 0])?.dot(ct)?),
                ])
            },
            Op::Conv2d { params } => {
                let (x, w) = (&inputs[0], &inputs[1]);
                let builder = ct.builder();
                let dx = builder.add_node(
                    Op::Conv2dBackpropInput {
                        input_shape: x.shape()?.clone(),
                        params: *params,
                    },
                    &[ct, w],
                )?;
                let dw = builder.add_node(
                    Op::Conv2dBackpropFilter {
                        filter_shape: w.shape()?.clone(),
                        params: *params,
                    },
                    &[x, ct],
                )?;
                Ok(vec![Some(dx), Some(dw)])
            },
            Op::Parameter { .. } | Op::Constant { .. } | Op::RngUniform { .. } => Ok(vec![None; inputs.len()]),
            other => Err(XrtError::VjpNotFound(other.name().to_string())),
        }
    }
}

/// Propagate the cotangent of `node` to its operands.
fn backprop_node(builder: &GraphBuilder, node: &Node, ct: Cotangent) -> XrtResult<Vec<Option<Cotangent>>> {
    match &node.op {
        Op::Tuple => match ct {
            Cotangent::Tuple(mut slots) => {
                slots.resize(node.operands.len(), None);
                Ok(slots)
            },
            Cotangent::Tensor(_) => Err(XrtError::GradientComputationFailed(
                "tensor cotangent for a tuple value".into(),
            )),
        },
        Op::GetTupleElement { index } => {
            let arity = builder
                .node(node.operands[0])?
                .ty
                .as_tuple()
                .map(<[ValueType]>::len)
                .unwrap_or_default();
            let mut slots = vec![None; arity];
            if let Some(slot) = slots.get_mut(*index) {
                *slot = Some(ct);
            }
            Ok(vec![Some(Cotangent::Tuple(slots))])
        },
        op => {
            let inputs = node
                .operands
                .iter()
                .map(|&id| builder.traced(id))
                .collect::<XrtResult<Vec<_>>>()?;
            let output = builder.traced(node.id)?;
            let grads = op.vjp(&inputs, &output, ct.tensor()?)?;
            Ok(grads.into_iter().map(|g| g.map(Cotangent::Tensor)).collect())
        },
    }
}

/// Gradients of the scalar `loss` with respect to each of `wrt`.
///
/// Every result has the type of its `wrt` value; values the loss does not
/// depend on get zeros. Ops with no differentiation rule only fail when they
/// sit between the loss and a `wrt` value.
pub fn gradients(loss: &Traced, wrt: &[&Traced]) -> XrtResult<Vec<Traced>> {
    let builder = loss.builder().clone();
    if wrt.iter().any(|w| !builder.same_as(w)) {
        return Err(XrtError::BuilderMismatch);
    }
    let loss_type = loss.tensor_type()?;
    if !loss_type.shape.is_scalar() || !loss_type.dtype.is_float() {
        return Err(XrtError::GradientComputationFailed(format!(
            "loss must be a floating-point scalar, got {}",
            loss_type
        )));
    }

    let nodes = (0..=loss.id().0)
        .map(|i| builder.node(NodeId(i)))
        .collect::<XrtResult<Vec<_>>>()?;

    let mut needs_grad = vec![false; nodes.len()];
    for node in &nodes {
        needs_grad[node.id.0] =
            wrt.iter().any(|w| w.id() == node.id) || node.operands.iter().any(|o| needs_grad[o.0]);
    }

    let mut adjoints: HashMap<NodeId, Cotangent> = HashMap::new();
    adjoints.insert(loss.id(), Cotangent::Tensor(loss.scalar_like(1.0)?));

    for node in nodes.iter().rev() {
        if !needs_grad[node.id.0] || node.operands.is_empty() {
            continue;
        }
        let Some(ct) = adjoints.get(&node.id).cloned() else {
            continue;
        };
        let contributions = backprop_node(&builder, node, ct)?;
        for (operand, contribution) in node.operands.iter().zip(contributions) {
            let Some(contribution) = contribution else { continue };
            if !needs_grad[operand.0] {
                continue;
            }
            let merged = match adjoints.remove(operand) {
                Some(existing) => existing.accumulate(contribution)?,
                None => contribution,
            };
            adjoints.insert(*operand, merged);
        }
    }

    wrt.iter()
        .map(|w| materialize(&builder, adjoints.get(&w.id()).cloned(), w.value_type()))
        .collect()
}

/// `(loss, grad_0, grad_1, ...)` as one traced tuple, ready to build.
pub fn value_and_gradients(loss: &Traced, wrt: &[&Traced]) -> XrtResult<Traced> {
    let grads = gradients(loss, wrt)?;
    let mut elements = vec![loss];
    elements.extend(grads.iter());
    loss.builder().tuple(&elements)
}
