//! Tracing API for building [`Computation`]s.
//!
//! Operations on [`Traced`] values append nodes to the shared builder with
//! their type inferred on the spot, so shape errors surface at the call that
//! caused them. [`GraphBuilder::build`] then extracts the part of the graph
//! reachable from a root.

use crate::error::{XrtError, XrtResult};
use crate::graph::{BinaryOp, CompareOp, Computation, Conv2dParams, Node, NodeId, Op, ParameterSpec, UnaryOp};
use crate::infer::infer_type;
use crate::literal::Literal;
use crate::types::{DType, Shape, TensorType, ValueType};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

struct BuilderState {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<ParameterSpec>,
}

/// Records traced operations. Cloning shares the same underlying graph.
#[derive(Clone)]
pub struct GraphBuilder {
    inner: Rc<RefCell<BuilderState>>,
}

/// A value in a graph under construction.
#[derive(Clone)]
pub struct Traced {
    id: NodeId,
    ty: ValueType,
    builder: GraphBuilder,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(BuilderState {
                name: name.into(),
                nodes: Vec::new(),
                parameters: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn node_count(&self) -> usize {
        self.inner.borrow().nodes.len()
    }

    fn same(&self, other: &GraphBuilder) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn push(&self, op: Op, operands: Vec<NodeId>, ty: ValueType) -> Traced {
        let mut state = self.inner.borrow_mut();
        let id = NodeId(state.nodes.len());
        state.nodes.push(Node {
            id,
            op,
            operands,
            ty: ty.clone(),
        });
        Traced {
            id,
            ty,
            builder: self.clone(),
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> XrtResult<Node> {
        self.inner
            .borrow()
            .nodes
            .get(id.0)
            .cloned()
            .ok_or_else(|| XrtError::InvalidGraph(format!("node {} not found", id)))
    }

    pub(crate) fn traced(&self, id: NodeId) -> XrtResult<Traced> {
        let node = self.node(id)?;
        Ok(Traced {
            id,
            ty: node.ty,
            builder: self.clone(),
        })
    }

    pub(crate) fn same_as(&self, traced: &Traced) -> bool {
        self.same(&traced.builder)
    }

    pub(crate) fn add_node(&self, op: Op, operands: &[&Traced]) -> XrtResult<Traced> {
        if operands.iter().any(|t| !self.same(&t.builder)) {
            return Err(XrtError::BuilderMismatch);
        }
        let types: Vec<&ValueType> = operands.iter().map(|t| &t.ty).collect();
        let ty = infer_type(&op, &types)?;
        Ok(self.push(op, operands.iter().map(|t| t.id).collect(), ty))
    }

    /// Declare parameter `index` of the computation.
    pub fn parameter(&self, index: usize, ty: impl Into<ValueType>, name: impl Into<String>) -> XrtResult<Traced> {
        let ty = ty.into();
        if self.inner.borrow().parameters.iter().any(|p| p.index == index) {
            return Err(XrtError::InvalidGraph(format!("parameter {} declared twice", index)));
        }
        let traced = self.push(Op::Parameter { index }, Vec::new(), ty.clone());
        self.inner.borrow_mut().parameters.push(ParameterSpec {
            index,
            name: name.into(),
            id: traced.id,
            ty,
        });
        Ok(traced)
    }

    pub fn constant(&self, value: Literal) -> Traced {
        let ty = ValueType::Tensor(value.tensor_type());
        self.push(Op::Constant { value }, Vec::new(), ty)
    }

    pub fn constant_scalar(&self, dtype: DType, value: f64) -> Traced {
        self.constant(Literal::filled(dtype, Shape::scalar(), value))
    }

    /// Uniform samples in `[lo, hi)` of the given shape; the dtype follows the bounds.
    pub fn rng_uniform(&self, lo: &Traced, hi: &Traced, shape: impl Into<Shape>) -> XrtResult<Traced> {
        self.add_node(Op::RngUniform { shape: shape.into() }, &[lo, hi])
    }

    pub fn tuple(&self, elements: &[&Traced]) -> XrtResult<Traced> {
        self.add_node(Op::Tuple, elements)
    }

    /// Extract the computation rooted at `root`.
    ///
    /// Nodes not reachable from the root are dropped, except parameters,
    /// which always stay so the signature is what the caller declared.
    /// Surviving nodes keep their relative order and are renumbered.
    pub fn build(&self, root: &Traced) -> XrtResult<Computation> {
        if !self.same(&root.builder) {
            return Err(XrtError::BuilderMismatch);
        }
        let state = self.inner.borrow();

        let mut parameters = state.parameters.clone();
        parameters.sort_by_key(|p| p.index);
        for (i, param) in parameters.iter().enumerate() {
            if param.index != i {
                return Err(XrtError::InvalidGraph(format!(
                    "parameters must be numbered from 0 without gaps, missing {}",
                    i
                )));
            }
        }

        let mut live: HashSet<NodeId> = parameters.iter().map(|p| p.id).collect();
        let mut stack = vec![root.id];
        while let Some(id) = stack.pop() {
            if live.insert(id) {
                stack.extend(state.nodes[id.0].operands.iter().copied().filter(|o| !live.contains(o)));
            }
        }

        let mut remap = vec![None; state.nodes.len()];
        let mut nodes = Vec::with_capacity(live.len());
        for node in state.nodes.iter().filter(|n| live.contains(&n.id)) {
            let id = NodeId(nodes.len());
            remap[node.id.0] = Some(id);
            let operands = node
                .operands
                .iter()
                .map(|o| remap[o.0].ok_or_else(|| XrtError::InternalError(format!("operand {} was pruned", o))))
                .collect::<XrtResult<Vec<_>>>()?;
            nodes.push(Node {
                id,
                op: node.op.clone(),
                operands,
                ty: node.ty.clone(),
            });
        }

        let lookup = |old: NodeId| {
            remap[old.0].ok_or_else(|| XrtError::InternalError(format!("node {} was pruned", old)))
        };
        let parameters = parameters
            .into_iter()
            .map(|p| Ok(ParameterSpec { id: lookup(p.id)?, ..p }))
            .collect::<XrtResult<Vec<_>>>()?;

        let computation = Computation {
            name: state.name.clone(),
            parameters,
            nodes,
            root: lookup(root.id)?,
        };
        computation.verify()?;
        Ok(computation)
    }
}

impl fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("GraphBuilder")
            .field("name", &state.name)
            .field("nodes", &state.nodes.len())
            .field("parameters", &state.parameters.len())
            .finish()
    }
}

/// Trace `f` over fresh parameters of the given types and build the result.
pub fn trace<F>(name: &str, parameter_types: &[ValueType], f: F) -> XrtResult<Computation>
where
    F: FnOnce(&GraphBuilder, &[Traced]) -> XrtResult<Traced>,
{
    let builder = GraphBuilder::new(name);
    let params = parameter_types
        .iter()
        .enumerate()
        .map(|(i, ty)| builder.parameter(i, ty.clone(), format!("p{}", i)))
        .collect::<XrtResult<Vec<_>>>()?;
    let root = f(&builder, &params)?;
    builder.build(&root)
}

impl Traced {
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn value_type(&self) -> &ValueType {
        &self.ty
    }

    #[inline]
    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    pub fn tensor_type(&self) -> XrtResult<&TensorType> {
        self.ty
            .as_tensor()
            .ok_or_else(|| XrtError::InvalidValueKind(format!("expected a tensor, got {}", self.ty)))
    }

    pub fn dtype(&self) -> XrtResult<DType> {
        Ok(self.tensor_type()?.dtype)
    }

    pub fn shape(&self) -> XrtResult<&Shape> {
        Ok(&self.tensor_type()?.shape)
    }

    fn unary(&self, kind: UnaryOp) -> XrtResult<Traced> {
        self.builder.add_node(Op::Unary { kind }, &[self])
    }

    fn binary(&self, rhs: &Traced, kind: BinaryOp) -> XrtResult<Traced> {
        self.builder.add_node(Op::Binary { kind }, &[self, rhs])
    }

    fn compare(&self, rhs: &Traced, kind: CompareOp) -> XrtResult<Traced> {
        self.builder.add_node(Op::Compare { kind }, &[self, rhs])
    }

    pub fn neg(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Neg)
    }

    pub fn exp(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Exp)
    }

    pub fn log(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Sqrt)
    }

    pub fn tanh(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Tanh)
    }

    pub fn relu(&self) -> XrtResult<Traced> {
        self.unary(UnaryOp::Relu)
    }

    pub fn add(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Div)
    }

    pub fn maximum(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Max)
    }

    pub fn minimum(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.binary(rhs, BinaryOp::Min)
    }

    pub fn eq(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Eq)
    }

    pub fn ne(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Ne)
    }

    pub fn lt(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Lt)
    }

    pub fn le(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Le)
    }

    pub fn gt(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Gt)
    }

    pub fn ge(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.compare(rhs, CompareOp::Ge)
    }

    /// `self` is the predicate.
    pub fn select(&self, on_true: &Traced, on_false: &Traced) -> XrtResult<Traced> {
        self.builder.add_node(Op::Select, &[self, on_true, on_false])
    }

    /// Scalar constant with this value's dtype.
    pub fn scalar_like(&self, value: f64) -> XrtResult<Traced> {
        Ok(self.builder.constant_scalar(self.dtype()?, value))
    }

    pub fn add_scalar(&self, value: f64) -> XrtResult<Traced> {
        self.add(&self.scalar_like(value)?)
    }

    pub fn mul_scalar(&self, value: f64) -> XrtResult<Traced> {
        self.mul(&self.scalar_like(value)?)
    }

    pub fn convert(&self, dtype: DType) -> XrtResult<Traced> {
        self.builder.add_node(Op::Convert { dtype }, &[self])
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> XrtResult<Traced> {
        self.builder.add_node(Op::Reshape { shape: shape.into() }, &[self])
    }

    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> XrtResult<Traced> {
        self.builder.add_node(Op::BroadcastTo { shape: shape.into() }, &[self])
    }

    pub fn transpose(&self, perm: &[usize]) -> XrtResult<Traced> {
        self.builder.add_node(Op::Transpose { perm: perm.to_vec() }, &[self])
    }

    pub fn sum(&self, axes: &[usize]) -> XrtResult<Traced> {
        self.builder.add_node(Op::ReduceSum { axes: axes.to_vec() }, &[self])
    }

    /// Sum over every axis, giving a scalar.
    pub fn sum_all(&self) -> XrtResult<Traced> {
        let axes: Vec<usize> = (0..self.shape()?.ndim()).collect();
        self.sum(&axes)
    }

    pub fn mean(&self, axes: &[usize]) -> XrtResult<Traced> {
        let count: usize = {
            let dims = self.shape()?.dims();
            axes.iter().filter_map(|&a| dims.get(a)).product()
        };
        self.sum(axes)?.mul_scalar(1.0 / count.max(1) as f64)
    }

    pub fn reduce_max(&self, axes: &[usize]) -> XrtResult<Traced> {
        self.builder.add_node(Op::ReduceMax { axes: axes.to_vec() }, &[self])
    }

    pub fn dot(&self, rhs: &Traced) -> XrtResult<Traced> {
        self.builder.add_node(Op::Dot, &[self, rhs])
    }

    /// Select entries along `axis` with a rank-1 integer index vector.
    pub fn gather(&self, indices: &Traced, axis: usize) -> XrtResult<Traced> {
        self.builder.add_node(Op::Gather { axis }, &[self, indices])
    }

    pub fn tile(&self, reps: &[usize]) -> XrtResult<Traced> {
        self.builder.add_node(Op::Tile { reps: reps.to_vec() }, &[self])
    }

    pub fn conv2d(&self, filter: &Traced, params: Conv2dParams) -> XrtResult<Traced> {
        self.builder.add_node(Op::Conv2d { params }, &[self, filter])
    }

    pub fn max_pool2d(&self, window: [usize; 2], stride: [usize; 2]) -> XrtResult<Traced> {
        self.builder.add_node(Op::MaxPool2d { window, stride }, &[self])
    }

    pub fn get_tuple_element(&self, index: usize) -> XrtResult<Traced> {
        self.builder.add_node(Op::GetTupleElement { index }, &[self])
    }

    /// Follow a path of tuple indices.
    pub fn get(&self, path: &[usize]) -> XrtResult<Traced> {
        path.iter().try_fold(self.clone(), |value, &i| value.get_tuple_element(i))
    }
}

impl fmt::Debug for Traced {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Traced({} : {})", self.id, self.ty)
    }
}
