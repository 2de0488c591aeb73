//! Shape and dtype rules for every [`Op`].
//!
//! The builder applies these eagerly while tracing, and the server applies
//! them again when it verifies a computation submitted for compilation.

use crate::error::{XrtError, XrtResult};
use crate::graph::{Conv2dParams, Op, UnaryOp};
use crate::types::{DType, Shape, TensorType, ValueType};

/// Output size of a strided window along one dimension, or `None` if the
/// window does not fit.
pub fn window_output_dim(input: usize, window: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || window == 0 || padded < window {
        return None;
    }
    Some((padded - window) / stride + 1)
}

/// Output shape of an NCHW × OIHW convolution.
pub fn conv2d_output_shape(input: &Shape, filter: &Shape, params: &Conv2dParams) -> XrtResult<Shape> {
    let op = "conv2d".to_string();
    if input.ndim() != 4 || filter.ndim() != 4 {
        return Err(XrtError::IncompatibleShapes {
            lhs: input.clone(),
            rhs: filter.clone(),
            op,
        });
    }
    let (x, w) = (input.dims(), filter.dims());
    if x[1] != w[1] {
        return Err(XrtError::IncompatibleShapes {
            lhs: input.clone(),
            rhs: filter.clone(),
            op,
        });
    }
    let oh = window_output_dim(x[2], w[2], params.stride[0], params.padding[0]);
    let ow = window_output_dim(x[3], w[3], params.stride[1], params.padding[1]);
    match (oh, ow) {
        (Some(oh), Some(ow)) => Ok(Shape::from([x[0], w[0], oh, ow])),
        _ => Err(XrtError::IncompatibleShapes {
            lhs: input.clone(),
            rhs: filter.clone(),
            op,
        }),
    }
}

fn expect_arity(op: &Op, operands: &[&ValueType], n: usize) -> XrtResult<()> {
    if operands.len() != n {
        return Err(XrtError::InvalidGraph(format!(
            "{} expects {} operands, got {}",
            op.name(),
            n,
            operands.len()
        )));
    }
    Ok(())
}

fn tensor<'a>(op: &Op, ty: &'a ValueType) -> XrtResult<&'a TensorType> {
    ty.as_tensor()
        .ok_or_else(|| XrtError::InvalidValueKind(format!("{} expects tensor operands, got {}", op.name(), ty)))
}

fn same_dtype(op: &Op, lhs: &TensorType, rhs: &TensorType) -> XrtResult<DType> {
    if lhs.dtype != rhs.dtype {
        return Err(XrtError::DTypeConflictInOp {
            left: lhs.dtype,
            right: rhs.dtype,
            op: op.name().to_string(),
        });
    }
    Ok(lhs.dtype)
}

fn broadcast(op: &Op, lhs: &Shape, rhs: &Shape) -> XrtResult<Shape> {
    Shape::broadcast_shape(lhs, rhs).ok_or_else(|| XrtError::IncompatibleShapes {
        lhs: lhs.clone(),
        rhs: rhs.clone(),
        op: op.name().to_string(),
    })
}

fn check_axes(axes: &[usize], ndim: usize) -> XrtResult<()> {
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= ndim || axes[..i].contains(&axis) {
            return Err(XrtError::InvalidAxis { axis, ndim });
        }
    }
    Ok(())
}

fn reject_dtype(op: &Op, dtype: DType, bad: impl Fn(DType) -> bool) -> XrtResult<()> {
    if bad(dtype) {
        return Err(XrtError::UnsupportedDTypeForOp {
            dtype,
            op: op.name().to_string(),
        });
    }
    Ok(())
}

/// Infer the result type of `op` applied to operands of the given types.
///
/// `Parameter` has no operands to infer from; its type comes from the
/// parameter spec and asking for it here is an error.
pub fn infer_type(op: &Op, operands: &[&ValueType]) -> XrtResult<ValueType> {
    match op {
        Op::Parameter { index } => Err(XrtError::InternalError(format!(
            "type of parameter {} comes from its spec",
            index
        ))),
        Op::Constant { value } => {
            expect_arity(op, operands, 0)?;
            Ok(ValueType::Tensor(value.tensor_type()))
        },
        Op::RngUniform { shape } => {
            expect_arity(op, operands, 2)?;
            let lo = tensor(op, operands[0])?;
            let hi = tensor(op, operands[1])?;
            let dtype = same_dtype(op, lo, hi)?;
            reject_dtype(op, dtype, |d| !d.is_float())?;
            if !lo.shape.is_scalar() || !hi.shape.is_scalar() {
                return Err(XrtError::InvalidArgument("rng_uniform bounds must be scalars".into()));
            }
            Ok(ValueType::tensor(dtype, shape.clone()))
        },
        Op::Unary { kind } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            match kind {
                UnaryOp::Neg | UnaryOp::Relu => reject_dtype(op, t.dtype, |d| d.is_bool())?,
                _ => reject_dtype(op, t.dtype, |d| !d.is_float())?,
            }
            Ok(ValueType::Tensor(t.clone()))
        },
        Op::Binary { .. } => {
            expect_arity(op, operands, 2)?;
            let (l, r) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            let dtype = same_dtype(op, l, r)?;
            reject_dtype(op, dtype, |d| d.is_bool())?;
            Ok(ValueType::tensor(dtype, broadcast(op, &l.shape, &r.shape)?))
        },
        Op::Compare { .. } => {
            expect_arity(op, operands, 2)?;
            let (l, r) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            same_dtype(op, l, r)?;
            Ok(ValueType::tensor(DType::BOOL, broadcast(op, &l.shape, &r.shape)?))
        },
        Op::Select => {
            expect_arity(op, operands, 3)?;
            let pred = tensor(op, operands[0])?;
            let (t, f) = (tensor(op, operands[1])?, tensor(op, operands[2])?);
            if !pred.dtype.is_bool() {
                return Err(XrtError::DTypeMismatch {
                    expected: DType::BOOL,
                    got: pred.dtype,
                });
            }
            let dtype = same_dtype(op, t, f)?;
            let shape = broadcast(op, &broadcast(op, &pred.shape, &t.shape)?, &f.shape)?;
            Ok(ValueType::tensor(dtype, shape))
        },
        Op::Convert { dtype } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            Ok(ValueType::tensor(*dtype, t.shape.clone()))
        },
        Op::Reshape { shape } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            if t.shape.size() != shape.size() {
                return Err(XrtError::ShapeMismatch {
                    expected: t.shape.clone(),
                    got: shape.clone(),
                });
            }
            Ok(ValueType::tensor(t.dtype, shape.clone()))
        },
        Op::BroadcastTo { shape } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            if !t.shape.can_broadcast_to(shape) {
                return Err(XrtError::IncompatibleShapes {
                    lhs: t.shape.clone(),
                    rhs: shape.clone(),
                    op: op.name().to_string(),
                });
            }
            Ok(ValueType::tensor(t.dtype, shape.clone()))
        },
        Op::Transpose { perm } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            if perm.len() != t.shape.ndim() {
                return Err(XrtError::InvalidArgument(format!(
                    "permutation {:?} does not match rank {}",
                    perm,
                    t.shape.ndim()
                )));
            }
            check_axes(perm, t.shape.ndim())?;
            let dims: Vec<usize> = perm.iter().map(|&p| t.shape.dims()[p]).collect();
            Ok(ValueType::tensor(t.dtype, dims))
        },
        Op::ReduceSum { axes } | Op::ReduceMax { axes } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            reject_dtype(op, t.dtype, |d| d.is_bool())?;
            check_axes(axes, t.shape.ndim())?;
            Ok(ValueType::tensor(t.dtype, t.shape.without_axes(axes)))
        },
        Op::Dot => {
            expect_arity(op, operands, 2)?;
            let (a, b) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            let dtype = same_dtype(op, a, b)?;
            reject_dtype(op, dtype, |d| d.is_bool())?;
            let (ad, bd) = (a.shape.dims(), b.shape.dims());
            if ad.len() != 2 || bd.len() != 2 || ad[1] != bd[0] {
                return Err(XrtError::IncompatibleShapes {
                    lhs: a.shape.clone(),
                    rhs: b.shape.clone(),
                    op: op.name().to_string(),
                });
            }
            Ok(ValueType::tensor(dtype, [ad[0], bd[1]]))
        },
        Op::Gather { axis } => {
            expect_arity(op, operands, 2)?;
            let (src, idx) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            if *axis >= src.shape.ndim() {
                return Err(XrtError::InvalidAxis {
                    axis: *axis,
                    ndim: src.shape.ndim(),
                });
            }
            if !idx.dtype.is_int() {
                return Err(XrtError::UnsupportedDTypeForOp {
                    dtype: idx.dtype,
                    op: "gather indices".into(),
                });
            }
            if idx.shape.ndim() != 1 {
                return Err(XrtError::InvalidArgument(format!(
                    "gather indices must be a vector, got shape {}",
                    idx.shape
                )));
            }
            let mut dims = src.shape.to_vec();
            dims[*axis] = idx.shape.dims()[0];
            Ok(ValueType::tensor(src.dtype, dims))
        },
        Op::Tile { reps } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            if reps.len() != t.shape.ndim() {
                return Err(XrtError::InvalidArgument(format!(
                    "tile repetitions {:?} do not match rank {}",
                    reps,
                    t.shape.ndim()
                )));
            }
            let dims: Vec<usize> = t.shape.dims().iter().zip(reps).map(|(d, r)| d * r).collect();
            Ok(ValueType::tensor(t.dtype, dims))
        },
        Op::Conv2d { params } => {
            expect_arity(op, operands, 2)?;
            let (x, w) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            let dtype = same_dtype(op, x, w)?;
            reject_dtype(op, dtype, |d| !d.is_float())?;
            Ok(ValueType::tensor(dtype, conv2d_output_shape(&x.shape, &w.shape, params)?))
        },
        Op::Conv2dBackpropInput { input_shape, params } => {
            expect_arity(op, operands, 2)?;
            let (dy, w) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            let dtype = same_dtype(op, dy, w)?;
            let expected = conv2d_output_shape(input_shape, &w.shape, params)?;
            if expected != dy.shape {
                return Err(XrtError::ShapeMismatch {
                    expected,
                    got: dy.shape.clone(),
                });
            }
            Ok(ValueType::tensor(dtype, input_shape.clone()))
        },
        Op::Conv2dBackpropFilter { filter_shape, params } => {
            expect_arity(op, operands, 2)?;
            let (x, dy) = (tensor(op, operands[0])?, tensor(op, operands[1])?);
            let dtype = same_dtype(op, x, dy)?;
            let expected = conv2d_output_shape(&x.shape, filter_shape, params)?;
            if expected != dy.shape {
                return Err(XrtError::ShapeMismatch {
                    expected,
                    got: dy.shape.clone(),
                });
            }
            Ok(ValueType::tensor(dtype, filter_shape.clone()))
        },
        Op::MaxPool2d { window, stride } => {
            expect_arity(op, operands, 1)?;
            let t = tensor(op, operands[0])?;
            reject_dtype(op, t.dtype, |d| d.is_bool())?;
            let d = t.shape.dims();
            if d.len() != 4 {
                return Err(XrtError::InvalidArgument(format!("max_pool2d expects NCHW input, got {}", t.shape)));
            }
            match (
                window_output_dim(d[2], window[0], stride[0], 0),
                window_output_dim(d[3], window[1], stride[1], 0),
            ) {
                (Some(oh), Some(ow)) => Ok(ValueType::tensor(t.dtype, [d[0], d[1], oh, ow])),
                _ => Err(XrtError::InvalidArgument(format!(
                    "pooling window {:?} does not fit input {}",
                    window, t.shape
                ))),
            }
        },
        Op::Tuple => Ok(ValueType::Tuple(operands.iter().map(|t| (*t).clone()).collect())),
        Op::GetTupleElement { index } => {
            expect_arity(op, operands, 1)?;
            let elements = operands[0]
                .as_tuple()
                .ok_or_else(|| XrtError::InvalidValueKind(format!("get_tuple_element on {}", operands[0])))?;
            elements.get(*index).cloned().ok_or_else(|| {
                XrtError::InvalidArgument(format!("tuple index {} out of range for {}", index, operands[0]))
            })
        },
    }
}
