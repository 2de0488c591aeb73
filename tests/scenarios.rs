mod common;

use xrt_client::{run_scenarios, suite, with_harness, Outcome};

fn run_builtin(name: &str) {
    let scenario = suite::find(name).unwrap();
    with_harness(&common::config(), |session| scenario.run(session)).unwrap();
}

#[test]
fn test_compile_cache() {
    run_builtin("compile_cache");
}

#[test]
fn test_rng_scalar() {
    run_builtin("rng_scalar");
}

#[test]
fn test_tuple_identity() {
    run_builtin("tuple_identity");
}

#[test]
fn test_scalar_broadcast() {
    run_builtin("scalar_broadcast");
}

#[test]
fn test_gather() {
    run_builtin("gather");
}

#[test]
fn test_tile() {
    run_builtin("tile");
}

#[test]
fn test_conv_relu_grad() {
    run_builtin("conv_relu_grad");
}

#[test]
fn test_resnet_forward() {
    run_builtin("resnet_forward");
}

#[test]
fn test_full_suite_in_one_session() {
    let report = with_harness(&common::config(), |session| Ok(run_scenarios(session, &suite::builtin()))).unwrap();
    let failures: Vec<_> = report
        .scenarios
        .iter()
        .filter(|s| s.outcome != Outcome::Passed)
        .map(|s| format!("{}: {:?}", s.name, s.outcome))
        .collect();
    assert!(failures.is_empty(), "{:?}", failures);
    assert_eq!(report.passed(), suite::builtin().len());
}

#[test]
fn test_failing_scenario_does_not_stop_the_rest() {
    use xrt_client::{HarnessError, Scenario};

    let scenarios = [
        Scenario::new("fails", "", |_| Err(HarnessError::assertion("expected failure"))),
        Scenario::new("panics", "", |_| panic!("scenario panic")),
        suite::find("tile").unwrap(),
    ];
    let report = with_harness(&common::config(), |session| Ok(run_scenarios(session, &scenarios))).unwrap();

    assert_eq!(report.scenarios.len(), 3);
    assert_eq!(
        report.scenarios[0].outcome,
        Outcome::Failed("Assertion failed: expected failure".to_string())
    );
    match &report.scenarios[1].outcome {
        Outcome::Failed(message) => assert!(message.contains("scenario panic")),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(report.scenarios[2].outcome, Outcome::Passed);
}

#[test]
fn test_stop_flag_skips_the_remaining_scenarios() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use xrt_client::{run_scenarios_until, Scenario};

    static STOP: AtomicBool = AtomicBool::new(false);

    let scenarios = [
        Scenario::new("interrupts", "", |session| {
            STOP.store(true, Ordering::SeqCst);
            suite::find("tile").unwrap().run(session)
        }),
        suite::find("tile").unwrap(),
        suite::find("tile").unwrap(),
    ];
    let report = with_harness(&common::config(), |session| {
        let report = run_scenarios_until(session, &scenarios, &STOP);
        assert_eq!(session.stats()?.live_buffers, 0);
        Ok(report)
    })
    .unwrap();

    assert_eq!(report.scenarios[0].outcome, Outcome::Passed);
    for skipped in &report.scenarios[1..] {
        assert_eq!(skipped.outcome, Outcome::Failed("skipped: interrupted".to_string()));
    }
}
