//! Built-in scenarios: the checks `xrt suite` runs against a live session.

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{assert_allclose, assert_type, assert_values_eq, Scenario};
use crate::session::Session;
use xrt_core::autodiff::value_and_gradients;
use xrt_core::models::{conv_relu_fixture, resnet, ResNetConfig};
use xrt_core::{DType, GraphBuilder, HostValue, Literal, Shape, Traced, ValueType, XrtResult};

pub fn builtin() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "compile_cache",
            "the same function compiled twice hits the cache and gives identical results",
            compile_cache,
        ),
        Scenario::new("rng_scalar", "a scalar uniform sample has type f32[]", rng_scalar),
        Scenario::new(
            "tuple_identity",
            "a tuple-returning identity reproduces its inputs and their types",
            tuple_identity,
        ),
        Scenario::new(
            "scalar_broadcast",
            "scalar operands broadcast and full reductions are zero-dimensional",
            scalar_broadcast,
        ),
        Scenario::new("gather", "gathering rows and columns matches host indexing", gather),
        Scenario::new("tile", "tiling square and row-vector arrays matches host tiling", tile),
        Scenario::new(
            "conv_relu_grad",
            "one backward pass through conv + relu gives the expected parameter gradients",
            conv_relu_grad,
        ),
        Scenario::new("resnet_forward", "a small resnet produces a softmax per image", resnet_forward),
    ]
}

pub fn find(name: &str) -> Option<Scenario> {
    builtin().into_iter().find(|s| s.name == name)
}

fn square_plus_one(_: &GraphBuilder, p: &[Traced]) -> XrtResult<Traced> {
    p[0].mul(&p[0])?.add_scalar(1.0)
}

fn compile_cache(session: &Session) -> HarnessResult<()> {
    let x = session.transfer(Literal::vec1(&[1f32, -2.0, 3.0, 0.5]))?;
    let first = session.trace("square_plus_one", &[&x], square_plus_one)?;
    let second = session.trace("square_plus_one", &[&x], square_plus_one)?;

    if !second.cache_hit() {
        return Err(HarnessError::assertion("second compile missed the cache"));
    }
    if first.fingerprint() != second.fingerprint() {
        return Err(HarnessError::assertion(format!(
            "fingerprints differ: {} vs {}",
            first.fingerprint(),
            second.fingerprint()
        )));
    }

    let a = first.execute(&[&x])?.fetch()?;
    let b = second.execute(&[&x])?.fetch()?;
    assert_values_eq(&a, &b)?;
    assert_values_eq(&a, &Literal::vec1(&[2f32, 5.0, 10.0, 1.25]).into())
}

fn rng_scalar(session: &Session) -> HarnessResult<()> {
    let exe = session.trace("uniform_scalar", &[], |g, _| {
        let lo = g.constant_scalar(DType::F32, 0.0);
        let hi = g.constant_scalar(DType::F32, 1.0);
        g.rng_uniform(&lo, &hi, Shape::scalar())
    })?;
    let expected = ValueType::scalar(DType::F32);
    assert_type(exe.result_type(), &expected)?;

    let sample = exe.execute(&[])?;
    assert_type(sample.value_type(), &expected)?;
    let value = sample.fetch()?.into_literal()?.get_first_element::<f32>()?;
    if !(0.0..1.0).contains(&value) {
        return Err(HarnessError::assertion(format!("sample {} outside [0, 1)", value)));
    }
    Ok(())
}

fn tuple_identity(session: &Session) -> HarnessResult<()> {
    let a = Literal::from_vec(&[1f32, 2.0, 3.0, 4.0], [2, 2])?;
    let b = Literal::vec1(&[7i32, 8, 9]);
    let da = session.transfer(a.clone())?;
    let db = session.transfer(b.clone())?;

    let exe = session.trace("tuple_identity", &[&da, &db], |g, p| g.tuple(&[&p[0], &p[1]]))?;
    let expected = ValueType::Tuple(vec![da.value_type().clone(), db.value_type().clone()]);
    assert_type(exe.result_type(), &expected)?;

    let out = exe.execute(&[&da, &db])?;
    assert_type(out.value_type(), &expected)?;
    assert_values_eq(&out.fetch()?, &HostValue::tuple(vec![a.into(), b.into()]))
}

fn scalar_broadcast(session: &Session) -> HarnessResult<()> {
    let x = session.transfer(Literal::from_vec(&[1f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3])?)?;
    let s = session.transfer(Literal::scalar(10f32))?;

    let exe = session.trace("scalar_broadcast", &[&x, &s], |g, p| {
        let shifted = p[0].add(&p[1])?;
        let total = p[0].mul_scalar(2.0)?.sum_all()?;
        g.tuple(&[&shifted, &total])
    })?;
    let out = exe.execute(&[&x, &s])?;
    let total = out.fetch()?;

    let expected = HostValue::tuple(vec![
        Literal::from_vec(&[11f32, 12.0, 13.0, 14.0, 15.0, 16.0], [2, 3])?.into(),
        Literal::scalar(42f32).into(),
    ]);
    assert_values_eq(&total, &expected)
}

/// Host-side `take` along axis 0 or 1 of a row-major `rows x cols` array.
fn host_gather(values: &[f32], cols: usize, indices: &[i32], axis: usize) -> Vec<f32> {
    let rows = values.len() / cols;
    let mut out = Vec::new();
    if axis == 0 {
        for &i in indices {
            let i = i as usize;
            out.extend_from_slice(&values[i * cols..(i + 1) * cols]);
        }
    } else {
        for r in 0..rows {
            out.extend(indices.iter().map(|&j| values[r * cols + j as usize]));
        }
    }
    out
}

fn gather(session: &Session) -> HarnessResult<()> {
    let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
    let x = session.transfer(Literal::from_vec(&values, [4, 3])?)?;

    for (axis, indices, shape) in [(0usize, vec![3i32, 0, 2, 0], [4usize, 3]), (1, vec![2, 0], [4, 2])] {
        let idx = session.transfer(Literal::vec1(&indices))?;
        let exe = session.trace(&format!("gather_axis{}", axis), &[&x, &idx], move |_, p| {
            p[0].gather(&p[1], axis)
        })?;
        let got = exe.execute(&[&x, &idx])?.fetch()?;
        let expected = Literal::from_vec(&host_gather(&values, 3, &indices, axis), shape)?;
        assert_values_eq(&got, &expected.into())?;
    }
    Ok(())
}

/// Host-side tiling of a row-major `rows x cols` array.
fn host_tile(values: &[f32], rows: usize, cols: usize, reps: [usize; 2]) -> Vec<f32> {
    let (out_rows, out_cols) = (rows * reps[0], cols * reps[1]);
    let mut out = Vec::with_capacity(out_rows * out_cols);
    for i in 0..out_rows {
        for j in 0..out_cols {
            out.push(values[(i % rows) * cols + j % cols]);
        }
    }
    out
}

fn tile(session: &Session) -> HarnessResult<()> {
    let cases: [(Vec<f32>, [usize; 2], [usize; 2]); 2] = [
        (vec![1.0, 2.0, 3.0, 4.0], [2, 2], [2, 3]),
        (vec![1.0, 2.0, 3.0], [1, 3], [3, 1]),
    ];

    for (values, [rows, cols], reps) in cases {
        let x = session.transfer(Literal::from_vec(&values, [rows, cols])?)?;
        let exe = session.trace("tile", &[&x], move |_, p| p[0].tile(&reps))?;
        let got = exe.execute(&[&x])?.fetch()?;
        let expected = Literal::from_vec(
            &host_tile(&values, rows, cols, reps),
            [rows * reps[0], cols * reps[1]],
        )?;
        assert_values_eq(&got, &expected.into())?;
    }
    Ok(())
}

fn conv_relu_grad(session: &Session) -> HarnessResult<()> {
    let fixture = conv_relu_fixture()?;
    let params = fixture.model.parameters();
    let x = session.transfer(fixture.input.clone())?;
    let p = session.transfer(params.clone())?;

    let model = fixture.model.clone();
    let exe = session.trace("conv_relu_grad", &[&x, &p], move |_, args| {
        let loss = model.forward(&args[0], &args[1])?.sum_all()?;
        value_and_gradients(&loss, &[&args[1]])
    })?;
    let out = exe.execute(&[&x, &p])?.fetch()?;

    let leaf = |path: &[usize]| -> HarnessResult<Vec<f64>> {
        out.get(path)
            .and_then(HostValue::as_literal)
            .map(Literal::to_f64_vec)
            .ok_or_else(|| HarnessError::assertion(format!("missing result element {:?}", path)))
    };
    let grads = out
        .get(&[1])
        .ok_or_else(|| HarnessError::assertion("missing gradient"))?;
    assert_type(&grads.value_type(), &params.value_type())?;

    assert_allclose(&leaf(&[0])?, &[9.0], 0.0, 1e-6)?;
    assert_allclose(&leaf(&[1, 0, 0])?, &[f64::from(fixture.expected_weight_grad)], 0.0, 1e-6)?;
    assert_allclose(&leaf(&[1, 0, 1])?, &[9.0], 0.0, 1e-6)
}

fn resnet_forward(session: &Session) -> HarnessResult<()> {
    let config = ResNetConfig {
        image_size: 16,
        ..ResNetConfig::default()
    };
    let model = resnet(&config)?;
    let batch = 2;
    let shape = config.input_shape(batch);
    let pixels: Vec<f64> = (0..shape.size()).map(|i| ((i as f64) * 0.37).sin()).collect();

    let x = session.transfer(Literal::from_f64(DType::F32, shape, &pixels)?)?;
    let p = session.transfer(model.parameters())?;
    let exe = session.trace("resnet_forward", &[&x, &p], move |_, args| model.forward(&args[0], &args[1]))?;
    assert_type(exe.result_type(), &ValueType::tensor(DType::F32, [batch, config.num_classes]))?;

    let probs = exe.execute(&[&x, &p])?.fetch()?.into_literal()?.to_f64_vec();
    let sums: Vec<f64> = probs.chunks(config.num_classes).map(|row| row.iter().sum()).collect();
    assert_allclose(&sums, &vec![1.0; batch], 0.0, 1e-4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_gather() {
        let values = [0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(host_gather(&values, 3, &[1, 1, 0], 0), vec![3.0, 4.0, 5.0, 3.0, 4.0, 5.0, 0.0, 1.0, 2.0]);
        assert_eq!(host_gather(&values, 3, &[2, 0], 1), vec![2.0, 0.0, 5.0, 3.0]);
    }

    #[test]
    fn test_host_tile() {
        assert_eq!(host_tile(&[1.0, 2.0], 1, 2, [2, 2]), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert_eq!(host_tile(&[1.0, 2.0], 2, 1, [1, 3]), vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_builtin_names_are_unique() {
        let scenarios = builtin();
        let mut names: Vec<_> = scenarios.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
        assert!(find("gather").is_some());
        assert!(find("nope").is_none());
    }
}
