use xrt_core::graph::Op;
use xrt_core::{trace, Computation, DType, GraphBuilder, Literal, Shape, TensorType, ValueType, XrtError};

fn f32_type(dims: &[usize]) -> ValueType {
    ValueType::tensor(DType::F32, dims)
}

#[test]
fn test_binary_op_broadcasts_scalar() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, f32_type(&[2, 3]), "x").unwrap();
    let y = x.add_scalar(1.0).unwrap();
    assert_eq!(y.value_type(), &f32_type(&[2, 3]));
}

#[test]
fn test_shape_error_at_trace_time() {
    let builder = GraphBuilder::new("f");
    let a = builder.parameter(0, f32_type(&[2, 3]), "a").unwrap();
    let b = builder.parameter(1, f32_type(&[4, 5]), "b").unwrap();
    assert!(matches!(a.add(&b), Err(XrtError::IncompatibleShapes { .. })));
    assert!(matches!(a.dot(&b), Err(XrtError::IncompatibleShapes { .. })));
}

#[test]
fn test_dtype_conflict() {
    let builder = GraphBuilder::new("f");
    let a = builder.parameter(0, f32_type(&[2]), "a").unwrap();
    let b = builder.parameter(1, ValueType::tensor(DType::I32, [2]), "b").unwrap();
    assert!(matches!(a.mul(&b), Err(XrtError::DTypeConflictInOp { .. })));
}

#[test]
fn test_builder_mismatch() {
    let first = GraphBuilder::new("a");
    let second = GraphBuilder::new("b");
    let x = first.parameter(0, f32_type(&[]), "x").unwrap();
    let y = second.parameter(0, f32_type(&[]), "y").unwrap();
    assert!(matches!(x.add(&y), Err(XrtError::BuilderMismatch)));
    assert!(matches!(first.build(&y), Err(XrtError::BuilderMismatch)));
}

#[test]
fn test_build_prunes_unreachable_nodes() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, f32_type(&[4]), "x").unwrap();
    let unused = builder.parameter(1, f32_type(&[4]), "unused").unwrap();
    let _dead = unused.exp().unwrap();
    let root = x.neg().unwrap();

    let comp = builder.build(&root).unwrap();
    // Both parameters stay, the dead exp goes.
    assert_eq!(comp.parameters.len(), 2);
    assert_eq!(comp.nodes.len(), 3);
    assert!(comp.nodes.iter().all(|n| n.op.name() != "exp"));
    assert_eq!(comp.result_type().unwrap(), &f32_type(&[4]));
    comp.verify().unwrap();
}

#[test]
fn test_build_rejects_parameter_gap() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(1, f32_type(&[]), "x").unwrap();
    assert!(matches!(builder.build(&x), Err(XrtError::InvalidGraph(_))));
}

#[test]
fn test_duplicate_parameter() {
    let builder = GraphBuilder::new("f");
    builder.parameter(0, f32_type(&[]), "x").unwrap();
    assert!(builder.parameter(0, f32_type(&[]), "y").is_err());
}

#[test]
fn test_tuple_and_get_tuple_element() {
    let comp = trace("pair", &[f32_type(&[2]), ValueType::tensor(DType::I64, [3])], |b, p| {
        let t = b.tuple(&[&p[0], &p[1]])?;
        let second = t.get_tuple_element(1)?;
        assert_eq!(second.value_type(), &ValueType::tensor(DType::I64, [3]));
        Ok(t)
    })
    .unwrap();

    let expected = ValueType::Tuple(vec![f32_type(&[2]), ValueType::tensor(DType::I64, [3])]);
    assert_eq!(comp.result_type().unwrap(), &expected);
}

#[test]
fn test_get_tuple_element_out_of_range() {
    let builder = GraphBuilder::new("f");
    let x = builder.parameter(0, f32_type(&[]), "x").unwrap();
    let t = builder.tuple(&[&x]).unwrap();
    assert!(t.get_tuple_element(1).is_err());
    assert!(x.get_tuple_element(0).is_err());
}

#[test]
fn test_conv2d_output_shape() {
    let builder = GraphBuilder::new("conv");
    let x = builder.parameter(0, f32_type(&[2, 3, 8, 8]), "x").unwrap();
    let w = builder.parameter(1, f32_type(&[4, 3, 3, 3]), "w").unwrap();
    let y = x
        .conv2d(
            &w,
            xrt_core::Conv2dParams {
                stride: [2, 2],
                padding: [1, 1],
            },
        )
        .unwrap();
    assert_eq!(y.shape().unwrap().dims(), &[2, 4, 4, 4]);
}

#[test]
fn test_gather_requires_integer_vector() {
    let builder = GraphBuilder::new("g");
    let x = builder.parameter(0, f32_type(&[3, 4]), "x").unwrap();
    let bad = builder.parameter(1, f32_type(&[2]), "i").unwrap();
    assert!(x.gather(&bad, 0).is_err());

    let idx = builder.constant(Literal::vec1(&[2i64, 0]));
    let g = x.gather(&idx, 1).unwrap();
    assert_eq!(g.shape().unwrap().dims(), &[3, 2]);
}

#[test]
fn test_rng_uniform_type() {
    let builder = GraphBuilder::new("rng");
    let lo = builder.constant_scalar(DType::F32, 0.0);
    let hi = builder.constant_scalar(DType::F32, 1.0);
    let r = builder.rng_uniform(&lo, &hi, Shape::scalar()).unwrap();
    assert_eq!(r.value_type(), &ValueType::Tensor(TensorType::scalar(DType::F32)));

    let ilo = builder.constant_scalar(DType::I32, 0.0);
    let ihi = builder.constant_scalar(DType::I32, 1.0);
    assert!(builder.rng_uniform(&ilo, &ihi, Shape::scalar()).is_err());
}

#[test]
fn test_json_roundtrip_preserves_verification() {
    let comp = trace("f", &[f32_type(&[2, 2])], |_, p| p[0].transpose(&[1, 0])?.sum(&[0])).unwrap();
    let json = comp.to_json().unwrap();
    let back = Computation::from_json(&json).unwrap();
    assert_eq!(back, comp);
    back.verify().unwrap();
}

#[test]
fn test_verify_detects_wrong_type() {
    let mut comp = trace("f", &[f32_type(&[2])], |_, p| p[0].exp()).unwrap();
    let root = comp.root.0;
    comp.nodes[root].ty = f32_type(&[3]);
    assert!(matches!(comp.verify(), Err(XrtError::TypeMismatch { .. })));
}

#[test]
fn test_verify_detects_forward_reference() {
    let mut comp = trace("f", &[f32_type(&[2])], |_, p| p[0].exp()).unwrap();
    let root = comp.root.0;
    comp.nodes[root].operands[0] = comp.root;
    assert!(matches!(comp.verify(), Err(XrtError::InvalidGraph(_))));
}

#[test]
fn test_display_lists_nodes() {
    let comp = trace("double", &[f32_type(&[2])], |_, p| p[0].mul_scalar(2.0)).unwrap();
    let text = comp.to_string();
    assert!(text.starts_with("computation double(p0: f32[2]) -> f32[2] {"));
    assert!(text.contains("mul"));
    assert!(text.contains("ROOT"));
    assert!(matches!(comp.nodes[0].op, Op::Parameter { index: 0 }));
}
