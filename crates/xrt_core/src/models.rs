//! Ready-made models.

use crate::error::XrtResult;
use crate::graph::Conv2dParams;
use crate::layers::{Activation, BatchNorm2D, Conv2D, Layer, Linear, OtherLayer};
use crate::literal::Literal;
use crate::types::{DType, Shape};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResNetConfig {
    pub in_channels: usize,
    pub image_size: usize,
    pub stem_channels: usize,
    /// Residual blocks per stage; every stage after the first halves the
    /// spatial size and doubles the channels.
    pub stages: Vec<usize>,
    pub num_classes: usize,
    pub seed: u64,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            image_size: 32,
            stem_channels: 8,
            stages: vec![1, 1],
            num_classes: 10,
            seed: 0,
        }
    }
}

impl ResNetConfig {
    /// Input type for a batch of `batch` images.
    pub fn input_shape(&self, batch: usize) -> Shape {
        Shape::from([batch, self.in_channels, self.image_size, self.image_size])
    }
}

struct Init {
    rng: StdRng,
}

impl Init {
    // Kaiming uniform: U(-a, a) with a = sqrt(6 / fan_in)
    fn kaiming(&mut self, shape: &[usize], fan_in: usize) -> XrtResult<Literal> {
        let bound = (6.0 / fan_in.max(1) as f64).sqrt();
        let dist = Uniform::new(-bound, bound);
        let count: usize = shape.iter().product();
        let values: Vec<f32> = (0..count).map(|_| dist.sample(&mut self.rng) as f32).collect();
        Literal::from_vec(&values, shape)
    }

    fn conv(&mut self, cin: usize, cout: usize, kernel: usize, stride: usize, activation: Activation) -> XrtResult<Layer> {
        Ok(Layer::Conv(Conv2D {
            weight: self.kaiming(&[cout, cin, kernel, kernel], cin * kernel * kernel)?,
            bias: Literal::zeros(DType::F32, [cout]),
            params: Conv2dParams {
                stride: [stride, stride],
                padding: [kernel / 2, kernel / 2],
            },
            activation,
        }))
    }

    fn batch_norm(&mut self, channels: usize, activation: Activation) -> Layer {
        Layer::BatchNorm(BatchNorm2D {
            scale: Literal::filled(DType::F32, [channels], 1.0),
            shift: Literal::zeros(DType::F32, [channels]),
            running_mean: Literal::zeros(DType::F32, [channels]),
            running_var: Literal::filled(DType::F32, [channels], 1.0),
            epsilon: 1e-5,
            activation,
        })
    }

    fn basic_block(&mut self, channels: usize) -> XrtResult<Layer> {
        let residual = Layer::Chain(vec![
            self.conv(channels, channels, 3, 1, Activation::Identity)?,
            self.batch_norm(channels, Activation::Relu),
            self.conv(channels, channels, 3, 1, Activation::Identity)?,
            self.batch_norm(channels, Activation::Identity),
        ]);
        Ok(Layer::Chain(vec![
            Layer::Other(OtherLayer::Skip(Box::new(residual))),
            Layer::Activation(Activation::Relu),
        ]))
    }
}

/// ResNet-style classifier with seeded random `f32` weights.
///
/// Stem conv/bn/relu and a 2x2 max-pool, residual stages, global mean pool,
/// a dense head and softmax.
pub fn resnet(config: &ResNetConfig) -> XrtResult<Layer> {
    let mut init = Init {
        rng: StdRng::seed_from_u64(config.seed),
    };

    let mut layers = vec![
        init.conv(config.in_channels, config.stem_channels, 3, 1, Activation::Identity)?,
        init.batch_norm(config.stem_channels, Activation::Relu),
        Layer::Other(OtherLayer::MaxPool {
            window: [2, 2],
            stride: [2, 2],
        }),
    ];

    let mut channels = config.stem_channels;
    for (stage, &blocks) in config.stages.iter().enumerate() {
        let mut stage_layers = Vec::new();
        if stage > 0 {
            stage_layers.push(init.conv(channels, channels * 2, 3, 2, Activation::Identity)?);
            channels *= 2;
            stage_layers.push(init.batch_norm(channels, Activation::Relu));
        }
        for _ in 0..blocks {
            stage_layers.push(init.basic_block(channels)?);
        }
        layers.push(Layer::Chain(stage_layers));
    }

    layers.push(Layer::Other(OtherLayer::GlobalMeanPool));
    layers.push(Layer::Other(OtherLayer::Dense(Linear {
        weight: init.kaiming(&[channels, config.num_classes], channels)?,
        bias: Literal::zeros(DType::F32, [config.num_classes]),
        activation: Activation::Identity,
    })));
    layers.push(Layer::Activation(Activation::Softmax));

    Ok(Layer::Chain(layers))
}

/// The conv + relu gradient fixture.
#[derive(Debug, Clone)]
pub struct ConvReluFixture {
    pub model: Layer,
    pub input: Literal,
    /// Expected gradient of `sum(model(input))` with respect to the weight.
    pub expected_weight_grad: f32,
}

/// A 1x1 convolution (weight -1, bias 0) followed by relu, applied to a 3x3
/// input of -1. Every output is 1, so `d sum / d w` is the input sum, -9.
pub fn conv_relu_fixture() -> XrtResult<ConvReluFixture> {
    let model = Layer::Chain(vec![
        Layer::Conv(Conv2D {
            weight: Literal::from_vec(&[-1f32], [1, 1, 1, 1])?,
            bias: Literal::zeros(DType::F32, [1]),
            params: Conv2dParams::default(),
            activation: Activation::Identity,
        }),
        Layer::Activation(Activation::Relu),
    ]);
    Ok(ConvReluFixture {
        model,
        input: Literal::filled(DType::F32, [1, 1, 3, 3], -1.0),
        expected_weight_grad: -9.0,
    })
}
