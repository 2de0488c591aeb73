use rand::rngs::StdRng;
use rand::SeedableRng;
use xrt_core::autodiff::{gradients, value_and_gradients};
use xrt_core::interp::evaluate;
use xrt_core::{DType, GraphBuilder, HostValue, Literal, ValueType, XrtError};

fn run(builder: &GraphBuilder, root: &xrt_core::Traced, args: &[HostValue]) -> HostValue {
    let comp = builder.build(root).unwrap();
    evaluate(&comp, args, &mut StdRng::seed_from_u64(0)).unwrap()
}

fn f32_lit(values: &[f32], dims: &[usize]) -> HostValue {
    Literal::from_vec(values, dims).unwrap().into()
}

#[test]
fn test_grad_of_sum_of_squares() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::tensor(DType::F32, [3]), "x").unwrap();
    let loss = x.mul(&x).unwrap().sum_all().unwrap();
    let grads = gradients(&loss, &[&x]).unwrap();
    let out = run(&builder, &grads[0], &[f32_lit(&[1.0, -2.0, 3.0], &[3])]);
    assert_eq!(out.to_vec::<f32>().unwrap(), vec![2.0, -4.0, 6.0]);
}

#[test]
fn test_grad_unbroadcasts_scalar_operand() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::tensor(DType::F32, [2, 2]), "x").unwrap();
    let s = builder.parameter(1, ValueType::scalar(DType::F32), "s").unwrap();
    let loss = x.mul(&s).unwrap().sum_all().unwrap();
    let grads = gradients(&loss, &[&x, &s]).unwrap();
    assert_eq!(grads[1].value_type(), &ValueType::scalar(DType::F32));

    let root = builder.tuple(&[&grads[0], &grads[1]]).unwrap();
    let out = run(
        &builder,
        &root,
        &[f32_lit(&[1.0, 2.0, 3.0, 4.0], &[2, 2]), Literal::scalar(3f32).into()],
    )
    .into_tuple()
    .unwrap();
    assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![3.0; 4]);
    assert_eq!(out[1].to_vec::<f32>().unwrap(), vec![10.0]);
}

#[test]
fn test_grad_through_dot_and_relu() {
    let builder = GraphBuilder::new("f");
    let a = builder.parameter(0, ValueType::tensor(DType::F32, [1, 2]), "a").unwrap();
    let w = builder.parameter(1, ValueType::tensor(DType::F32, [2, 2]), "w").unwrap();
    let loss = a.dot(&w).unwrap().relu().unwrap().sum_all().unwrap();
    let grads = gradients(&loss, &[&w]).unwrap();
    // a w = [1*1 + 2*1, 1*(-1) + 2*(-1)] = [3, -3]; relu masks the second column.
    let out = run(
        &builder,
        &grads[0],
        &[f32_lit(&[1.0, 2.0], &[1, 2]), f32_lit(&[1.0, -1.0, 1.0, -1.0], &[2, 2])],
    );
    assert_eq!(out.to_vec::<f32>().unwrap(), vec![1.0, 0.0, 2.0, 0.0]);
}

#[test]
fn test_grad_of_tuple_parameter_keeps_structure() {
    let builder = GraphBuilder::new("f");
    let ty = ValueType::Tuple(vec![
        ValueType::tensor(DType::F32, [2]),
        ValueType::Tuple(vec![ValueType::scalar(DType::F32)]),
    ]);
    let params = builder.parameter(0, ty.clone(), "params").unwrap();
    let first = params.get_tuple_element(0).unwrap();
    let loss = first.exp().unwrap().sum_all().unwrap();
    let grads = gradients(&loss, &[&params]).unwrap();
    assert_eq!(grads[0].value_type(), &ty);

    let arg = HostValue::tuple(vec![
        f32_lit(&[0.0, 0.0], &[2]),
        HostValue::tuple(vec![Literal::scalar(5f32).into()]),
    ]);
    let out = run(&builder, &grads[0], &[arg]);
    assert_eq!(out.get(&[0]).unwrap().to_vec::<f32>().unwrap(), vec![1.0, 1.0]);
    // The unused leaf gets a zero gradient.
    assert_eq!(out.get(&[1, 0]).unwrap().to_vec::<f32>().unwrap(), vec![0.0]);
}

#[test]
fn test_grad_accumulates_across_uses() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::scalar(DType::F32), "x").unwrap();
    // x * 3 + x
    let loss = x.mul_scalar(3.0).unwrap().add(&x).unwrap();
    let root = value_and_gradients(&loss, &[&x]).unwrap();
    let out = run(&builder, &root, &[Literal::scalar(2f32).into()]).into_tuple().unwrap();
    assert_eq!(out[0].to_vec::<f32>().unwrap(), vec![8.0]);
    assert_eq!(out[1].to_vec::<f32>().unwrap(), vec![4.0]);
}

#[test]
fn test_grad_requires_float_scalar_loss() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::tensor(DType::F32, [2]), "x").unwrap();
    assert!(matches!(
        gradients(&x, &[&x]),
        Err(XrtError::GradientComputationFailed(_))
    ));
}

#[test]
fn test_missing_rule_only_fails_on_differentiated_path() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::tensor(DType::F32, [2, 2]), "x").unwrap();
    let y = builder.parameter(1, ValueType::tensor(DType::F32, [2, 2]), "y").unwrap();
    let tiled = y.tile(&[1, 1]).unwrap();
    let loss = x.mul(&tiled).unwrap().sum_all().unwrap();

    // Tile sits between the loss and y only.
    assert!(gradients(&loss, &[&x]).is_ok());
    assert!(matches!(gradients(&loss, &[&y]), Err(XrtError::VjpNotFound(_))));
}

#[test]
fn test_grad_of_unrelated_value_is_zero() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, ValueType::scalar(DType::F32), "x").unwrap();
    let z = builder.parameter(1, ValueType::tensor(DType::F32, [3]), "z").unwrap();
    let loss = x.mul(&x).unwrap();
    let grads = gradients(&loss, &[&z]).unwrap();
    let out = run(&builder, &grads[0], &[Literal::scalar(1f32).into(), f32_lit(&[1.0; 3], &[3])]);
    assert_eq!(out.to_vec::<f32>().unwrap(), vec![0.0; 3]);
}
