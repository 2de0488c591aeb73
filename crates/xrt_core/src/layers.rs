//! Layered models as a closed set of variants.
//!
//! Walks over a model go through [`LayerVisitor`], one method per variant.
//! The visitors here rewrite parameter dtypes ([`map_to_device`]), collect
//! the nested parameter structure ([`Layer::parameters`]) and lower a model
//! onto a [`GraphBuilder`](crate::builder::GraphBuilder) ([`Layer::forward`]).

use crate::builder::Traced;
use crate::error::{XrtError, XrtResult};
use crate::graph::Conv2dParams;
use crate::literal::{HostValue, Literal};
use crate::types::{DType, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    /// Softmax over the last axis of a rank-2 input.
    Softmax,
}

/// 2-D convolution, NCHW input and OIHW weight, plus per-channel bias.
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2D {
    pub weight: Literal,
    pub bias: Literal,
    pub params: Conv2dParams,
    pub activation: Activation,
}

/// Inference-mode batch normalization over the channel axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm2D {
    pub scale: Literal,
    pub shift: Literal,
    pub running_mean: Literal,
    pub running_var: Literal,
    pub epsilon: f64,
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// `[in_features, out_features]`
    pub weight: Literal,
    pub bias: Literal,
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OtherLayer {
    MaxPool { window: [usize; 2], stride: [usize; 2] },
    /// Mean over the spatial axes, `[N, C, H, W] -> [N, C]`.
    GlobalMeanPool,
    /// `[N, ...] -> [N, prod(...)]`
    Flatten,
    Dense(Linear),
    /// Residual connection `x + inner(x)`.
    Skip(Box<Layer>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Conv(Conv2D),
    BatchNorm(BatchNorm2D),
    Chain(Vec<Layer>),
    Activation(Activation),
    Other(OtherLayer),
}

pub trait LayerVisitor {
    type Output;

    fn visit_conv(&mut self, conv: &Conv2D) -> Self::Output;
    fn visit_batch_norm(&mut self, norm: &BatchNorm2D) -> Self::Output;
    fn visit_chain(&mut self, layers: &[Layer]) -> Self::Output;
    fn visit_activation(&mut self, activation: Activation) -> Self::Output;
    fn visit_other(&mut self, other: &OtherLayer) -> Self::Output;
}

impl Layer {
    pub fn accept<V: LayerVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Layer::Conv(conv) => visitor.visit_conv(conv),
            Layer::BatchNorm(norm) => visitor.visit_batch_norm(norm),
            Layer::Chain(layers) => visitor.visit_chain(layers),
            Layer::Activation(activation) => visitor.visit_activation(*activation),
            Layer::Other(other) => visitor.visit_other(other),
        }
    }

    /// Nested parameter tuple mirroring the layer tree.
    ///
    /// Layers without parameters contribute an empty tuple so element
    /// positions always match child positions.
    pub fn parameters(&self) -> HostValue {
        self.accept(&mut ParameterCollector)
    }

    pub fn parameter_count(&self) -> usize {
        fn count(value: &HostValue) -> usize {
            match value {
                HostValue::Tensor(lit) => lit.element_count(),
                HostValue::Tuple(elements) => elements.iter().map(count).sum(),
            }
        }
        count(&self.parameters())
    }

    /// Lower the layer applied to `input`, reading weights from `params`,
    /// a traced value shaped like [`Layer::parameters`].
    pub fn forward(&self, input: &Traced, params: &Traced) -> XrtResult<Traced> {
        self.accept(&mut Lowering {
            input: input.clone(),
            params: params.clone(),
        })
    }
}

/// Rewrite every parameter of `layer` to `dtype`.
pub fn map_to_device(layer: &Layer, dtype: DType) -> Layer {
    layer.accept(&mut DeviceMapper { dtype })
}

struct DeviceMapper {
    dtype: DType,
}

impl LayerVisitor for DeviceMapper {
    type Output = Layer;

    fn visit_conv(&mut self, conv: &Conv2D) -> Layer {
        Layer::Conv(Conv2D {
            weight: conv.weight.convert(self.dtype),
            bias: conv.bias.convert(self.dtype),
            ..conv.clone()
        })
    }

    fn visit_batch_norm(&mut self, norm: &BatchNorm2D) -> Layer {
        Layer::BatchNorm(BatchNorm2D {
            scale: norm.scale.convert(self.dtype),
            shift: norm.shift.convert(self.dtype),
            running_mean: norm.running_mean.convert(self.dtype),
            running_var: norm.running_var.convert(self.dtype),
            ..norm.clone()
        })
    }

    fn visit_chain(&mut self, layers: &[Layer]) -> Layer {
        Layer::Chain(layers.iter().map(|l| l.accept(self)).collect())
    }

    fn visit_activation(&mut self, activation: Activation) -> Layer {
        Layer::Activation(activation)
    }

    fn visit_other(&mut self, other: &OtherLayer) -> Layer {
        Layer::Other(match other {
            OtherLayer::Dense(linear) => OtherLayer::Dense(Linear {
                weight: linear.weight.convert(self.dtype),
                bias: linear.bias.convert(self.dtype),
                activation: linear.activation,
            }),
            OtherLayer::Skip(inner) => OtherLayer::Skip(Box::new(inner.accept(self))),
            stateless => stateless.clone(),
        })
    }
}

struct ParameterCollector;

impl LayerVisitor for ParameterCollector {
    type Output = HostValue;

    fn visit_conv(&mut self, conv: &Conv2D) -> HostValue {
        HostValue::tuple(vec![conv.weight.clone().into(), conv.bias.clone().into()])
    }

    fn visit_batch_norm(&mut self, norm: &BatchNorm2D) -> HostValue {
        HostValue::tuple(vec![
            norm.scale.clone().into(),
            norm.shift.clone().into(),
            norm.running_mean.clone().into(),
            norm.running_var.clone().into(),
        ])
    }

    fn visit_chain(&mut self, layers: &[Layer]) -> HostValue {
        HostValue::tuple(layers.iter().map(|l| l.accept(self)).collect())
    }

    fn visit_activation(&mut self, _activation: Activation) -> HostValue {
        HostValue::tuple(Vec::new())
    }

    fn visit_other(&mut self, other: &OtherLayer) -> HostValue {
        match other {
            OtherLayer::Dense(linear) => {
                HostValue::tuple(vec![linear.weight.clone().into(), linear.bias.clone().into()])
            },
            OtherLayer::Skip(inner) => HostValue::tuple(vec![inner.accept(self)]),
            _ => HostValue::tuple(Vec::new()),
        }
    }
}

struct Lowering {
    input: Traced,
    params: Traced,
}

fn activate(x: Traced, activation: Activation) -> XrtResult<Traced> {
    match activation {
        Activation::Identity => Ok(x),
        Activation::Relu => x.relu(),
        Activation::Softmax => {
            let dims = x.shape()?.to_vec();
            if dims.len() != 2 {
                return Err(XrtError::InvalidArgument(format!(
                    "softmax expects a rank-2 input, got {}",
                    x.shape()?
                )));
            }
            let keep = Shape::from([dims[0], 1]);
            let shifted = x.sub(&x.reduce_max(&[1])?.reshape(keep.clone())?)?;
            let e = shifted.exp()?;
            e.div(&e.sum(&[1])?.reshape(keep)?)
        },
    }
}

/// `[C]` parameter reshaped to broadcast over NCHW.
fn per_channel(param: &Traced) -> XrtResult<Traced> {
    let channels = param.shape()?.size();
    param.reshape([1, channels, 1, 1])
}

impl LayerVisitor for Lowering {
    type Output = XrtResult<Traced>;

    fn visit_conv(&mut self, conv: &Conv2D) -> XrtResult<Traced> {
        let weight = self.params.get_tuple_element(0)?;
        let bias = self.params.get_tuple_element(1)?;
        let y = self.input.conv2d(&weight, conv.params)?.add(&per_channel(&bias)?)?;
        activate(y, conv.activation)
    }

    fn visit_batch_norm(&mut self, norm: &BatchNorm2D) -> XrtResult<Traced> {
        let param = |i: usize| self.params.get_tuple_element(i).and_then(|p| per_channel(&p));
        let (scale, shift, mean, var) = (param(0)?, param(1)?, param(2)?, param(3)?);
        let denom = var.add_scalar(norm.epsilon)?.sqrt()?;
        let y = self.input.sub(&mean)?.div(&denom)?.mul(&scale)?.add(&shift)?;
        activate(y, norm.activation)
    }

    fn visit_chain(&mut self, layers: &[Layer]) -> XrtResult<Traced> {
        let mut x = self.input.clone();
        for (i, layer) in layers.iter().enumerate() {
            x = layer.forward(&x, &self.params.get_tuple_element(i)?)?;
        }
        Ok(x)
    }

    fn visit_activation(&mut self, activation: Activation) -> XrtResult<Traced> {
        activate(self.input.clone(), activation)
    }

    fn visit_other(&mut self, other: &OtherLayer) -> XrtResult<Traced> {
        let x = &self.input;
        match other {
            OtherLayer::MaxPool { window, stride } => x.max_pool2d(*window, *stride),
            OtherLayer::GlobalMeanPool => x.mean(&[2, 3]),
            OtherLayer::Flatten => {
                let dims = x.shape()?.dims();
                let batch = dims.first().copied().unwrap_or(1);
                let rest: usize = dims.iter().skip(1).product();
                x.reshape([batch, rest])
            },
            OtherLayer::Dense(linear) => {
                let weight = self.params.get_tuple_element(0)?;
                let bias = self.params.get_tuple_element(1)?;
                activate(x.dot(&weight)?.add(&bias)?, linear.activation)
            },
            OtherLayer::Skip(inner) => x.add(&inner.forward(x, &self.params.get_tuple_element(0)?)?),
        }
    }
}
