mod common;

use xrt_client::{with_harness, HarnessError, Session, SessionOptions};
use xrt_core::{DType, HostValue, Literal, Shape, ValueType};

#[test]
fn test_handles_release_on_drop() {
    with_harness(&common::config(), |session| {
        let x = session.transfer(Literal::vec1(&[1f32, 2.0, 3.0]))?;
        let y = session.transfer(Literal::scalar(4i64))?;
        let stats = session.stats()?;
        assert_eq!((stats.live_buffers, stats.bytes_in_use), (2, 20));
        assert_eq!(session.live_buffers(), 2);

        drop(x);
        assert_eq!(session.stats()?.live_buffers, 1);
        assert!(y.release()?);
        assert_eq!(session.stats()?.live_buffers, 0);
        assert_eq!(session.live_buffers(), 0);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_release_all_then_close() {
    with_harness(&common::config(), |session| {
        let x = session.transfer(Literal::vec1(&[1f32, 2.0]))?;
        let exe = session.trace("neg", &[&x], |_, p| p[0].neg())?;
        let y = exe.execute(&[&x])?;

        let summary = session.release_all()?;
        assert_eq!((summary.buffers, summary.executables), (2, 1));
        let stats = session.stats()?;
        assert_eq!((stats.live_buffers, stats.live_executables), (0, 0));
        assert!(y.fetch().is_err());

        let closed = session.close()?;
        assert_eq!((closed.released_buffers, closed.released_executables), (0, 0));
        assert!(session.is_closed());
        assert!(matches!(
            session.transfer(Literal::scalar(1f32)),
            Err(HarnessError::SessionClosed)
        ));
        // Closing again is a no-op.
        session.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_zero_dimensional_and_tuple_results() {
    with_harness(&common::config(), |session| {
        let x = session.transfer(Literal::from_vec(&[1f32, 2.0, 3.0, 4.0], [2, 2])?)?;
        let exe = session.trace("stats", &[&x], |g, p| {
            let total = p[0].sum_all()?;
            let mean = p[0].mean(&[0])?;
            g.tuple(&[&total, &mean])
        })?;
        assert_eq!(
            exe.result_type(),
            &ValueType::Tuple(vec![
                ValueType::scalar(DType::F32),
                ValueType::tensor(DType::F32, [2])
            ])
        );

        let out = exe.execute(&[&x])?.fetch()?;
        let total = out.get(&[0]).unwrap().as_literal().unwrap();
        assert_eq!(total.shape(), &Shape::scalar());
        assert_eq!(total.get_first_element::<f32>()?, 10.0);
        assert_eq!(out.get(&[1]).unwrap().to_vec::<f32>()?, vec![2.0, 3.0]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_i64_values_round_trip_exactly() {
    with_harness(&common::config(), |session| {
        let extremes = Literal::vec1(&[(1i64 << 53) + 1, i64::MAX, i64::MIN]);
        let small = Literal::vec1(&[1i64, -3, 0]);
        let a = session.transfer(extremes.clone())?;
        let b = session.transfer(small.clone())?;
        let exe = session.trace("id", &[&a, &b], |g, p| g.tuple(&[&p[0], &p[1]]))?;

        let out = exe.execute(&[&a, &b])?.fetch()?;
        assert_eq!(out, HostValue::tuple(vec![extremes.into(), small.into()]));
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_argument_checks() {
    with_harness(&common::config(), |session| {
        let x = session.transfer(Literal::vec1(&[1f32, 2.0]))?;
        let exe = session.trace("double", &[&x], |_, p| p[0].mul_scalar(2.0))?;

        let ints = session.transfer(Literal::vec1(&[1i32, 2]))?;
        assert!(matches!(exe.execute(&[&ints]), Err(HarnessError::Execute(_))));
        assert!(matches!(exe.execute(&[]), Err(HarnessError::Execute(_))));
        assert!(matches!(exe.execute(&[&x, &x]), Err(HarnessError::Execute(_))));
        assert_eq!(exe.execute(&[&x])?.fetch()?.to_vec::<f32>()?, vec![2.0, 4.0]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_sessions_share_the_compilation_cache() {
    let config = common::config();
    let target = config.target().unwrap();
    with_harness(&config, |first| {
        let second = Session::open(&target, &SessionOptions::default())?;
        assert_ne!(first.id(), second.id());

        let a = first.transfer(Literal::vec1(&[3f32]))?;
        let b = second.transfer(Literal::vec1(&[3f32]))?;
        let exe_a = first.trace("cube", &[&a], |_, p| p[0].mul(&p[0])?.mul(&p[0]))?;
        let exe_b = second.trace("cube", &[&b], |_, p| p[0].mul(&p[0])?.mul(&p[0]))?;
        assert!(exe_b.cache_hit());
        assert_eq!(exe_a.fingerprint(), exe_b.fingerprint());

        // Handles do not cross sessions.
        assert!(matches!(exe_b.execute(&[&a]), Err(HarnessError::Execute(_))));
        assert_eq!(exe_b.execute(&[&b])?.fetch()?, HostValue::from(Literal::vec1(&[27f32])));

        drop((b, exe_b));
        second.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_seeded_sessions_sample_the_same_values() {
    let config = common::config();
    let target = config.target().unwrap();
    with_harness(&config, |first| {
        let options = SessionOptions {
            seed: config.seed,
            ..SessionOptions::default()
        };
        let second = Session::open(&target, &options)?;

        let sample = |session: &Session| -> Result<Vec<f32>, HarnessError> {
            let exe = session.trace("uniform", &[], |g, _| {
                let lo = g.constant_scalar(DType::F32, -1.0);
                let hi = g.constant_scalar(DType::F32, 1.0);
                g.rng_uniform(&lo, &hi, [8])
            })?;
            Ok(exe.execute(&[])?.fetch()?.to_vec::<f32>()?)
        };
        let a = sample(first)?;
        let b = sample(&second)?;
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
        second.close()?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_shutdown_stops_the_server() {
    let config = common::config();
    let port = common::port_of(&config);
    with_harness(&config, |session| {
        session.shutdown_server()?;
        assert!(session.is_closed());
        Ok(())
    })
    .unwrap();
    assert!(!common::is_listening(port));
}
