//! Reference executor for [`Computation`]s.
//!
//! Float tensors are computed in `f64` and rounded back to the node's dtype
//! after each op. Integer and boolean tensors are held in `i64` and wrap to
//! their width, so data movement never changes an integer value.

use crate::error::{XrtError, XrtResult};
use crate::graph::{BinaryOp, CompareOp, Computation, Conv2dParams, Node, Op, UnaryOp};
use crate::literal::{HostValue, Literal};
use crate::types::{DType, Shape, TensorType, ValueType};
use half::{bf16, f16};
use rand::Rng;
use rayon::prelude::*;

#[derive(Clone)]
enum Elements {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl Elements {
    fn from_literal(lit: &Literal) -> Self {
        if lit.dtype().is_float() {
            Self::Float(lit.to_f64_vec())
        } else {
            Self::Int(lit.to_i64_vec())
        }
    }

    fn to_f64(&self) -> Vec<f64> {
        match self {
            Self::Float(v) => v.clone(),
            Self::Int(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    fn to_i64(&self) -> Vec<i64> {
        match self {
            Self::Float(v) => v.iter().map(|&x| x as i64).collect(),
            Self::Int(v) => v.clone(),
        }
    }

    fn first_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => v.first().copied(),
            Self::Int(v) => v.first().map(|&x| x as f64),
        }
    }

    /// Element `sources[i]` at position `i`.
    fn pick(&self, sources: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(sources.iter().map(|&i| v[i]).collect()),
            Self::Int(v) => Self::Int(sources.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Storage for `dtype`: floats round to its precision, integers wrap to
    /// its width.
    fn narrow(self, dtype: DType) -> Self {
        match (self, dtype.is_float()) {
            (Self::Float(v), true) => Self::Float(v.into_iter().map(|x| round_float(dtype, x)).collect()),
            (Self::Int(v), true) => Self::Float(v.into_iter().map(|x| round_float(dtype, x as f64)).collect()),
            (Self::Int(v), false) => Self::Int(v.into_iter().map(|x| wrap_int(dtype, x)).collect()),
            (Self::Float(v), false) => Self::Int(v.into_iter().map(|x| float_to_int(dtype, x)).collect()),
        }
    }
}

#[derive(Clone)]
struct Buffer {
    ty: TensorType,
    data: Elements,
}

#[derive(Clone)]
enum Value {
    Tensor(Buffer),
    Tuple(Vec<Value>),
}

impl Value {
    fn from_host(value: &HostValue) -> Self {
        match value {
            HostValue::Tensor(lit) => Value::Tensor(Buffer {
                ty: lit.tensor_type(),
                data: Elements::from_literal(lit),
            }),
            HostValue::Tuple(elements) => Value::Tuple(elements.iter().map(Value::from_host).collect()),
        }
    }

    fn into_host(self) -> XrtResult<HostValue> {
        match self {
            Value::Tensor(Buffer { ty, data }) => {
                let lit = match data {
                    Elements::Float(v) => Literal::from_f64(ty.dtype, ty.shape, &v)?,
                    Elements::Int(v) => Literal::from_i64(ty.dtype, ty.shape, &v)?,
                };
                Ok(HostValue::Tensor(lit))
            },
            Value::Tuple(elements) => Ok(HostValue::Tuple(
                elements.into_iter().map(Value::into_host).collect::<XrtResult<_>>()?,
            )),
        }
    }

    fn tensor(&self) -> XrtResult<&Buffer> {
        match self {
            Value::Tensor(buf) => Ok(buf),
            Value::Tuple(_) => Err(XrtError::InvalidValueKind("expected a tensor, got a tuple".into())),
        }
    }
}

fn round_float(dtype: DType, v: f64) -> f64 {
    match dtype {
        DType::BF16 => bf16::from_f64(v).to_f64(),
        DType::F16 => f16::from_f64(v).to_f64(),
        DType::F32 => v as f32 as f64,
        _ => v,
    }
}

fn wrap_int(dtype: DType, v: i64) -> i64 {
    match dtype {
        DType::BOOL => i64::from(v != 0),
        DType::I32 => i64::from(v as i32),
        _ => v,
    }
}

fn float_to_int(dtype: DType, v: f64) -> i64 {
    match dtype {
        DType::BOOL => i64::from(v != 0.0),
        DType::I32 => i64::from(v as i32),
        _ => v as i64,
    }
}

/// For each element of `dst`, the linear index of the `src` element it reads
/// under numpy broadcasting.
fn broadcast_map(src: &Shape, dst: &Shape) -> Vec<usize> {
    let offset = dst.ndim() - src.ndim();
    let src_strides = src.strides();
    let dst_dims = dst.dims();
    let mut out = Vec::with_capacity(dst.size());
    let mut index = vec![0usize; dst.ndim()];
    for _ in 0..dst.size() {
        let mut linear = 0;
        for (i, &d) in src.dims().iter().enumerate() {
            if d != 1 {
                linear += index[i + offset] * src_strides[i];
            }
        }
        out.push(linear);
        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            if index[axis] < dst_dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

fn broadcast_data(buf: &Buffer, dst: &Shape) -> Elements {
    if &buf.ty.shape == dst {
        return buf.data.clone();
    }
    buf.data.pick(&broadcast_map(&buf.ty.shape, dst))
}

/// Multi-index of each linear position of `shape`, in row-major order.
fn unravel(mut linear: usize, dims: &[usize], out: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        out[axis] = linear % dims[axis];
        linear /= dims[axis];
    }
}

fn unary(kind: UnaryOp, v: f64) -> f64 {
    match kind {
        UnaryOp::Neg => -v,
        UnaryOp::Exp => v.exp(),
        UnaryOp::Log => v.ln(),
        UnaryOp::Sqrt => v.sqrt(),
        UnaryOp::Tanh => v.tanh(),
        UnaryOp::Relu => v.max(0.0),
    }
}

fn unary_int(kind: UnaryOp, v: i64) -> i64 {
    match kind {
        UnaryOp::Neg => v.wrapping_neg(),
        UnaryOp::Relu => v.max(0),
        _ => unary(kind, v as f64) as i64,
    }
}

fn binary(kind: BinaryOp, a: f64, b: f64) -> f64 {
    match kind {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Max => a.max(b),
        BinaryOp::Min => a.min(b),
    }
}

fn binary_int(kind: BinaryOp, a: i64, b: i64) -> XrtResult<i64> {
    Ok(match kind {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(XrtError::InvalidArgument("integer division by zero".into()));
            }
            a.wrapping_div(b)
        },
        BinaryOp::Max => a.max(b),
        BinaryOp::Min => a.min(b),
    })
}

fn compare<T: PartialOrd>(kind: CompareOp, a: T, b: T) -> bool {
    match kind {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}

fn select<T: Copy>(pred: &[i64], on_true: &[T], on_false: &[T]) -> Vec<T> {
    pred.iter()
        .zip(on_true.iter().zip(on_false))
        .map(|(&p, (&a, &b))| if p != 0 { a } else { b })
        .collect()
}

fn reduce<T: Copy>(data: &[T], shape: &Shape, axes: &[usize], init: T, f: impl Fn(T, T) -> T) -> Vec<T> {
    let dims = shape.dims();
    let out_shape = shape.without_axes(axes);
    let out_strides = out_shape.strides();
    let mut out = vec![init; out_shape.size()];
    let mut index = vec![0usize; dims.len()];
    for (linear, &v) in data.iter().enumerate() {
        unravel(linear, dims, &mut index);
        let target: usize = index
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .zip(&out_strides)
            .map(|((_, &i), &s)| i * s)
            .sum();
        out[target] = f(out[target], v);
    }
    out
}

fn transpose_sources(shape: &Shape, perm: &[usize], out_shape: &Shape) -> Vec<usize> {
    let in_strides = shape.strides();
    let out_dims = out_shape.dims();
    let mut index = vec![0usize; out_dims.len()];
    (0..out_shape.size())
        .map(|linear| {
            unravel(linear, out_dims, &mut index);
            perm.iter().enumerate().map(|(i, &p)| index[i] * in_strides[p]).sum()
        })
        .collect()
}

fn dot<T>(a: &[T], b: &[T], [m, k, n]: [usize; 3], zero: T, mul_add: impl Fn(T, T, T) -> T + Sync) -> Vec<T>
where
    T: Copy + Send + Sync,
{
    let mut out = vec![zero; m * n];
    out.par_chunks_mut(n.max(1)).enumerate().for_each(|(i, row)| {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..k).fold(zero, |acc, p| mul_add(acc, a[i * k + p], b[p * n + j]));
        }
    });
    out
}

fn gather_sources(shape: &Shape, indices: &[i64], axis: usize, out_shape: &Shape) -> XrtResult<Vec<usize>> {
    let extent = shape.dims()[axis];
    let resolved = indices
        .iter()
        .map(|&i| {
            usize::try_from(i)
                .ok()
                .filter(|&i| i < extent)
                .ok_or(XrtError::IndexOutOfBounds { index: i, size: extent })
        })
        .collect::<XrtResult<Vec<_>>>()?;

    let in_strides = shape.strides();
    let out_dims = out_shape.dims();
    let mut index = vec![0usize; out_dims.len()];
    Ok((0..out_shape.size())
        .map(|linear| {
            unravel(linear, out_dims, &mut index);
            index
                .iter()
                .enumerate()
                .map(|(a, &i)| (if a == axis { resolved[i] } else { i }) * in_strides[a])
                .sum()
        })
        .collect())
}

fn tile_sources(shape: &Shape, out_shape: &Shape) -> Vec<usize> {
    let in_dims = shape.dims();
    let in_strides = shape.strides();
    let out_dims = out_shape.dims();
    let mut index = vec![0usize; out_dims.len()];
    (0..out_shape.size())
        .map(|linear| {
            unravel(linear, out_dims, &mut index);
            index
                .iter()
                .enumerate()
                .map(|(a, &i)| (i % in_dims[a]) * in_strides[a])
                .sum()
        })
        .collect()
}

/// Geometry shared by the convolution kernels, all NCHW / OIHW.
struct ConvDims {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    o: usize,
    kh: usize,
    kw: usize,
    oh: usize,
    ow: usize,
    params: Conv2dParams,
}

impl ConvDims {
    fn new(input: &Shape, filter: &Shape, output: &Shape, params: Conv2dParams) -> Self {
        let (x, f, y) = (input.dims(), filter.dims(), output.dims());
        Self {
            n: x[0],
            c: x[1],
            h: x[2],
            w: x[3],
            o: f[0],
            kh: f[2],
            kw: f[3],
            oh: y[2],
            ow: y[3],
            params,
        }
    }

    /// Input coordinate read by output position `out` and kernel tap `k`, if
    /// it is not in the padding.
    #[inline]
    fn source(&self, out: usize, k: usize, axis: usize, extent: usize) -> Option<usize> {
        let pos = (out * self.params.stride[axis] + k).checked_sub(self.params.padding[axis])?;
        (pos < extent).then_some(pos)
    }

    #[inline]
    fn x(&self, n: usize, c: usize, i: usize, j: usize) -> usize {
        ((n * self.c + c) * self.h + i) * self.w + j
    }

    #[inline]
    fn f(&self, o: usize, c: usize, i: usize, j: usize) -> usize {
        ((o * self.c + c) * self.kh + i) * self.kw + j
    }

    #[inline]
    fn y(&self, n: usize, o: usize, i: usize, j: usize) -> usize {
        ((n * self.o + o) * self.oh + i) * self.ow + j
    }
}

fn conv2d(x: &[f64], f: &[f64], d: &ConvDims) -> Vec<f64> {
    let mut out = vec![0.0; d.n * d.o * d.oh * d.ow];
    out.par_chunks_mut((d.oh * d.ow).max(1)).enumerate().for_each(|(plane, dst)| {
        let (n, o) = (plane / d.o, plane % d.o);
        for oy in 0..d.oh {
            for ox in 0..d.ow {
                let mut acc = 0.0;
                for c in 0..d.c {
                    for ky in 0..d.kh {
                        let Some(iy) = d.source(oy, ky, 0, d.h) else { continue };
                        for kx in 0..d.kw {
                            let Some(ix) = d.source(ox, kx, 1, d.w) else { continue };
                            acc += x[d.x(n, c, iy, ix)] * f[d.f(o, c, ky, kx)];
                        }
                    }
                }
                dst[oy * d.ow + ox] = acc;
            }
        }
    });
    out
}

fn conv2d_backprop_input(dy: &[f64], f: &[f64], d: &ConvDims) -> Vec<f64> {
    let mut dx = vec![0.0; d.n * d.c * d.h * d.w];
    dx.par_chunks_mut((d.h * d.w).max(1)).enumerate().for_each(|(plane, dst)| {
        let (n, c) = (plane / d.c, plane % d.c);
        for o in 0..d.o {
            for oy in 0..d.oh {
                for ox in 0..d.ow {
                    let g = dy[d.y(n, o, oy, ox)];
                    for ky in 0..d.kh {
                        let Some(iy) = d.source(oy, ky, 0, d.h) else { continue };
                        for kx in 0..d.kw {
                            let Some(ix) = d.source(ox, kx, 1, d.w) else { continue };
                            dst[iy * d.w + ix] += g * f[d.f(o, c, ky, kx)];
                        }
                    }
                }
            }
        }
    });
    dx
}

fn conv2d_backprop_filter(x: &[f64], dy: &[f64], d: &ConvDims) -> Vec<f64> {
    let mut df = vec![0.0; d.o * d.c * d.kh * d.kw];
    df.par_chunks_mut((d.kh * d.kw).max(1)).enumerate().for_each(|(plane, dst)| {
        let (o, c) = (plane / d.c, plane % d.c);
        for n in 0..d.n {
            for oy in 0..d.oh {
                for ox in 0..d.ow {
                    let g = dy[d.y(n, o, oy, ox)];
                    for ky in 0..d.kh {
                        let Some(iy) = d.source(oy, ky, 0, d.h) else { continue };
                        for kx in 0..d.kw {
                            let Some(ix) = d.source(ox, kx, 1, d.w) else { continue };
                            dst[ky * d.kw + kx] += g * x[d.x(n, c, iy, ix)];
                        }
                    }
                }
            }
        }
    });
    df
}

fn max_pool2d(x: &[f64], in_shape: &Shape, window: [usize; 2], stride: [usize; 2], out_shape: &Shape) -> Vec<f64> {
    let dims = in_shape.dims();
    let (h, w) = (dims[2], dims[3]);
    let y = out_shape.dims();
    let (oh, ow) = (y[2], y[3]);
    let mut out = vec![f64::NEG_INFINITY; out_shape.size()];
    out.par_chunks_mut((oh * ow).max(1)).enumerate().for_each(|(plane, dst)| {
        let src = &x[plane * h * w..(plane + 1) * h * w];
        for oy in 0..oh {
            for ox in 0..ow {
                let cell = &mut dst[oy * ow + ox];
                for ky in 0..window[0] {
                    for kx in 0..window[1] {
                        *cell = cell.max(src[(oy * stride[0] + ky) * w + ox * stride[1] + kx]);
                    }
                }
            }
        }
    });
    out
}

fn tensor_type(node: &Node) -> XrtResult<&TensorType> {
    node.ty
        .as_tensor()
        .ok_or_else(|| XrtError::InternalError(format!("node {} is not tensor-typed", node.id)))
}

fn eval_node<R: Rng + ?Sized>(node: &Node, operands: &[&Value], args: &[HostValue], rng: &mut R) -> XrtResult<Value> {
    let t = |i: usize| operands[i].tensor();

    if let Op::Tuple = node.op {
        return Ok(Value::Tuple(operands.iter().map(|v| (*v).clone()).collect()));
    }
    if let Op::GetTupleElement { index } = node.op {
        return match operands[0] {
            Value::Tuple(elements) => elements
                .get(index)
                .cloned()
                .ok_or_else(|| XrtError::InternalError(format!("tuple index {} out of range", index))),
            Value::Tensor(_) => Err(XrtError::InvalidValueKind("get_tuple_element on a tensor".into())),
        };
    }
    if let Op::Parameter { index } = node.op {
        return args
            .get(index)
            .map(Value::from_host)
            .ok_or(XrtError::ArgumentCount {
                expected: index + 1,
                got: args.len(),
            });
    }

    let ty = tensor_type(node)?;
    let shape = &ty.shape;
    let data = match &node.op {
        Op::Constant { value } => Elements::from_literal(value),
        Op::RngUniform { .. } => {
            let bound = |i: usize| -> XrtResult<f64> {
                t(i)?
                    .data
                    .first_f64()
                    .ok_or_else(|| XrtError::InvalidArgument("rng bound has no elements".into()))
            };
            let (lo, hi) = (bound(0)?, bound(1)?);
            Elements::Float(
                (0..shape.size())
                    .map(|_| {
                        let v = round_float(ty.dtype, lo + (hi - lo) * rng.gen::<f64>());
                        if v >= hi {
                            lo
                        } else {
                            v
                        }
                    })
                    .collect(),
            )
        },
        Op::Unary { kind } => match &t(0)?.data {
            Elements::Float(v) => Elements::Float(v.iter().map(|&x| unary(*kind, x)).collect()),
            Elements::Int(v) => Elements::Int(v.iter().map(|&x| unary_int(*kind, x)).collect()),
        },
        Op::Binary { kind } => match (broadcast_data(t(0)?, shape), broadcast_data(t(1)?, shape)) {
            (Elements::Int(a), Elements::Int(b)) => Elements::Int(
                a.iter()
                    .zip(&b)
                    .map(|(&a, &b)| binary_int(*kind, a, b))
                    .collect::<XrtResult<_>>()?,
            ),
            (a, b) => Elements::Float(
                a.to_f64()
                    .iter()
                    .zip(&b.to_f64())
                    .map(|(&a, &b)| binary(*kind, a, b))
                    .collect(),
            ),
        },
        Op::Compare { kind } => {
            let flags: Vec<bool> = match (broadcast_data(t(0)?, shape), broadcast_data(t(1)?, shape)) {
                (Elements::Int(a), Elements::Int(b)) => a.iter().zip(&b).map(|(&a, &b)| compare(*kind, a, b)).collect(),
                (a, b) => a
                    .to_f64()
                    .iter()
                    .zip(&b.to_f64())
                    .map(|(&a, &b)| compare(*kind, a, b))
                    .collect(),
            };
            Elements::Int(flags.into_iter().map(i64::from).collect())
        },
        Op::Select => {
            let pred = broadcast_data(t(0)?, shape).to_i64();
            match (broadcast_data(t(1)?, shape), broadcast_data(t(2)?, shape)) {
                (Elements::Int(a), Elements::Int(b)) => Elements::Int(select(&pred, &a, &b)),
                (a, b) => Elements::Float(select(&pred, &a.to_f64(), &b.to_f64())),
            }
        },
        Op::Convert { .. } | Op::Reshape { .. } => t(0)?.data.clone(),
        Op::BroadcastTo { .. } => broadcast_data(t(0)?, shape),
        Op::Transpose { perm } => {
            let x = t(0)?;
            x.data.pick(&transpose_sources(&x.ty.shape, perm, shape))
        },
        Op::ReduceSum { axes } => {
            let x = t(0)?;
            match &x.data {
                Elements::Float(v) => Elements::Float(reduce(v, &x.ty.shape, axes, 0.0, |a, b| a + b)),
                Elements::Int(v) => Elements::Int(reduce(v, &x.ty.shape, axes, 0, i64::wrapping_add)),
            }
        },
        Op::ReduceMax { axes } => {
            let x = t(0)?;
            match &x.data {
                Elements::Float(v) => Elements::Float(reduce(v, &x.ty.shape, axes, f64::NEG_INFINITY, f64::max)),
                Elements::Int(v) => Elements::Int(reduce(v, &x.ty.shape, axes, i64::MIN, std::cmp::max)),
            }
        },
        Op::Dot => {
            let (a, b) = (t(0)?, t(1)?);
            let dims = [a.ty.shape.dims()[0], a.ty.shape.dims()[1], b.ty.shape.dims()[1]];
            match (&a.data, &b.data) {
                (Elements::Int(x), Elements::Int(y)) => {
                    Elements::Int(dot(x, y, dims, 0, |acc, p, q| acc.wrapping_add(p.wrapping_mul(q))))
                },
                (x, y) => Elements::Float(dot(&x.to_f64(), &y.to_f64(), dims, 0.0, |acc, p, q| acc + p * q)),
            }
        },
        Op::Gather { axis } => {
            let (src, indices) = (t(0)?, t(1)?);
            src.data
                .pick(&gather_sources(&src.ty.shape, &indices.data.to_i64(), *axis, shape)?)
        },
        Op::Tile { .. } => {
            let x = t(0)?;
            x.data.pick(&tile_sources(&x.ty.shape, shape))
        },
        Op::Conv2d { params } => {
            let (x, f) = (t(0)?, t(1)?);
            let dims = ConvDims::new(&x.ty.shape, &f.ty.shape, shape, *params);
            Elements::Float(conv2d(&x.data.to_f64(), &f.data.to_f64(), &dims))
        },
        Op::Conv2dBackpropInput { input_shape, params } => {
            let (dy, f) = (t(0)?, t(1)?);
            let dims = ConvDims::new(input_shape, &f.ty.shape, &dy.ty.shape, *params);
            Elements::Float(conv2d_backprop_input(&dy.data.to_f64(), &f.data.to_f64(), &dims))
        },
        Op::Conv2dBackpropFilter { filter_shape, params } => {
            let (x, dy) = (t(0)?, t(1)?);
            let dims = ConvDims::new(&x.ty.shape, filter_shape, &dy.ty.shape, *params);
            Elements::Float(conv2d_backprop_filter(&x.data.to_f64(), &dy.data.to_f64(), &dims))
        },
        Op::MaxPool2d { window, stride } => {
            let x = t(0)?;
            Elements::Float(max_pool2d(&x.data.to_f64(), &x.ty.shape, *window, *stride, shape))
        },
        Op::Parameter { .. } | Op::Tuple | Op::GetTupleElement { .. } => {
            return Err(XrtError::InternalError(format!("{} is not an element-wise op", node.op.name())));
        },
    };

    Ok(Value::Tensor(Buffer {
        ty: ty.clone(),
        data: data.narrow(ty.dtype),
    }))
}

/// Check `args` against the computation's parameter types.
pub fn check_arguments(computation: &Computation, args: &[ValueType]) -> XrtResult<()> {
    if args.len() != computation.parameters.len() {
        return Err(XrtError::ArgumentCount {
            expected: computation.parameters.len(),
            got: args.len(),
        });
    }
    for (param, arg) in computation.parameters.iter().zip(args) {
        if &param.ty != arg {
            return Err(XrtError::TypeMismatch {
                expected: param.ty.clone(),
                got: arg.clone(),
            });
        }
    }
    Ok(())
}

/// Evaluate `computation` on host arguments.
pub fn evaluate<R: Rng + ?Sized>(computation: &Computation, args: &[HostValue], rng: &mut R) -> XrtResult<HostValue> {
    let arg_types: Vec<ValueType> = args.iter().map(HostValue::value_type).collect();
    check_arguments(computation, &arg_types)?;

    let mut values: Vec<Value> = Vec::with_capacity(computation.nodes.len());
    for node in &computation.nodes {
        let value = {
            let operands = node
                .operands
                .iter()
                .map(|o| {
                    values.get(o.0).ok_or_else(|| {
                        XrtError::InvalidGraph(format!("node {} uses {} before it is defined", node.id, o))
                    })
                })
                .collect::<XrtResult<Vec<_>>>()?;
            eval_node(node, &operands, args, rng)?
        };
        values.push(value);
    }

    values
        .into_iter()
        .nth(computation.root.0)
        .ok_or_else(|| XrtError::InvalidGraph(format!("root {} not found", computation.root)))?
        .into_host()
}
