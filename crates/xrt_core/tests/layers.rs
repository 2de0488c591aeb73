use rand::rngs::StdRng;
use rand::SeedableRng;
use xrt_core::autodiff::gradients;
use xrt_core::interp::evaluate;
use xrt_core::layers::{map_to_device, Activation, Layer, LayerVisitor, Linear, OtherLayer};
use xrt_core::models::{conv_relu_fixture, resnet, ResNetConfig};
use xrt_core::{DType, GraphBuilder, HostValue, Literal, ValueType};

/// Counts leaf layers; checks the visitor can be implemented outside the crate.
struct LeafCounter;

impl LayerVisitor for LeafCounter {
    type Output = usize;

    fn visit_conv(&mut self, _: &xrt_core::layers::Conv2D) -> usize {
        1
    }

    fn visit_batch_norm(&mut self, _: &xrt_core::layers::BatchNorm2D) -> usize {
        1
    }

    fn visit_chain(&mut self, layers: &[Layer]) -> usize {
        layers.iter().map(|l| l.accept(self)).sum()
    }

    fn visit_activation(&mut self, _: Activation) -> usize {
        1
    }

    fn visit_other(&mut self, other: &OtherLayer) -> usize {
        match other {
            OtherLayer::Skip(inner) => inner.accept(self),
            _ => 1,
        }
    }
}

#[test]
fn test_conv_relu_weight_gradient() {
    let fixture = conv_relu_fixture().unwrap();
    let params = fixture.model.parameters();

    let builder = GraphBuilder::new("conv_relu_grad");
    let x = builder
        .parameter(0, ValueType::Tensor(fixture.input.tensor_type()), "x")
        .unwrap();
    let p = builder.parameter(1, params.value_type(), "params").unwrap();
    let loss = fixture.model.forward(&x, &p).unwrap().sum_all().unwrap();
    let grads = gradients(&loss, &[&p]).unwrap();
    assert_eq!(grads[0].value_type(), &params.value_type());

    let comp = builder.build(&grads[0]).unwrap();
    let out = evaluate(
        &comp,
        &[fixture.input.clone().into(), params],
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();

    let grad_w = out.get(&[0, 0]).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(grad_w, vec![fixture.expected_weight_grad]);
    // d sum / d bias is the number of outputs that passed the relu.
    assert_eq!(out.get(&[0, 1]).unwrap().to_vec::<f32>().unwrap(), vec![9.0]);
    // The relu layer has no parameters.
    assert_eq!(out.get(&[1]).unwrap(), &HostValue::tuple(Vec::new()));
}

#[test]
fn test_parameters_mirror_layer_tree() {
    let model = Layer::Chain(vec![
        Layer::Activation(Activation::Relu),
        Layer::Other(OtherLayer::Dense(Linear {
            weight: Literal::zeros(DType::F32, [4, 2]),
            bias: Literal::zeros(DType::F32, [2]),
            activation: Activation::Identity,
        })),
    ]);
    let params = model.parameters();
    assert_eq!(params.as_tuple().unwrap().len(), 2);
    assert_eq!(params.get(&[0]).unwrap(), &HostValue::tuple(Vec::new()));
    assert_eq!(params.get(&[1, 0]).unwrap().as_literal().unwrap().shape().dims(), &[4, 2]);
    assert_eq!(model.parameter_count(), 10);
}

#[test]
fn test_map_to_device_rewrites_every_parameter() {
    let model = resnet(&ResNetConfig::default()).unwrap();
    let mapped = map_to_device(&model, DType::BF16);

    fn all_leaves(value: &HostValue, dtype: DType) -> bool {
        match value {
            HostValue::Tensor(lit) => lit.dtype() == dtype,
            HostValue::Tuple(elements) => elements.iter().all(|e| all_leaves(e, dtype)),
        }
    }
    assert!(all_leaves(&model.parameters(), DType::F32));
    assert!(all_leaves(&mapped.parameters(), DType::BF16));
    assert_eq!(mapped.parameter_count(), model.parameter_count());
    assert_eq!(mapped.accept(&mut LeafCounter), model.accept(&mut LeafCounter));
}

#[test]
fn test_resnet_inference_produces_distribution() {
    let config = ResNetConfig {
        image_size: 8,
        stem_channels: 4,
        stages: vec![1, 1],
        num_classes: 5,
        ..ResNetConfig::default()
    };
    let model = resnet(&config).unwrap();
    let params = model.parameters();

    let builder = GraphBuilder::new("resnet");
    let x = builder
        .parameter(0, ValueType::tensor(DType::F32, config.input_shape(2)), "x")
        .unwrap();
    let p = builder.parameter(1, params.value_type(), "params").unwrap();
    let y = model.forward(&x, &p).unwrap();
    assert_eq!(y.value_type(), &ValueType::tensor(DType::F32, [2, 5]));

    let comp = builder.build(&y).unwrap();
    let input: Vec<f32> = (0..config.input_shape(2).size()).map(|i| (i % 7) as f32 / 7.0).collect();
    let out = evaluate(
        &comp,
        &[Literal::from_vec(&input, config.input_shape(2)).unwrap().into(), params],
        &mut StdRng::seed_from_u64(0),
    )
    .unwrap();

    let probs = out.to_vec::<f32>().unwrap();
    for row in probs.chunks(5) {
        let total: f32 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-4, "row sums to {}", total);
        assert!(row.iter().all(|&p| p >= 0.0));
    }
}

#[test]
fn test_resnet_weights_are_seeded() {
    let a = resnet(&ResNetConfig::default()).unwrap();
    let b = resnet(&ResNetConfig::default()).unwrap();
    let c = resnet(&ResNetConfig {
        seed: 1,
        ..ResNetConfig::default()
    })
    .unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}
