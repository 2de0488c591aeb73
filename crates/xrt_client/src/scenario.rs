//! Compile-run-assert scenarios and the helpers they assert with.

use crate::error::{HarnessError, HarnessResult};
use crate::harness::TeardownReport;
use crate::session::Session;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use xrt_core::{HostValue, ValueType};

pub type ScenarioFn = fn(&Session) -> HarnessResult<()>;

/// One independent compile → execute → fetch → assert check.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    run: ScenarioFn,
}

impl Scenario {
    pub const fn new(name: &'static str, description: &'static str, run: ScenarioFn) -> Self {
        Self { name, description, run }
    }

    pub fn run(&self, session: &Session) -> HarnessResult<()> {
        (self.run)(session)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_micros() as f64 / 1000.0)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub scenarios: Vec<ScenarioReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<TeardownReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.scenarios.iter().filter(|s| s.outcome == Outcome::Passed).count()
    }

    pub fn failed(&self) -> usize {
        self.scenarios.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}

/// Run every scenario in order. A failing or panicking scenario is recorded
/// and the next one still runs; a fatal error (lost connection) stops the
/// run and marks the remaining scenarios failed.
pub fn run_scenarios(session: &Session, scenarios: &[Scenario]) -> SuiteReport {
    run_scenarios_until(session, scenarios, &AtomicBool::new(false))
}

/// [`run_scenarios`], except that once `stop` is set every scenario not yet
/// started is skipped. The scenario in progress runs to completion.
pub fn run_scenarios_until(session: &Session, scenarios: &[Scenario], stop: &AtomicBool) -> SuiteReport {
    let mut report = SuiteReport::default();
    let mut fatal: Option<String> = None;

    for scenario in scenarios {
        if fatal.is_none() && stop.load(Ordering::SeqCst) {
            fatal = Some("interrupted".to_string());
        }
        if let Some(reason) = &fatal {
            report.scenarios.push(ScenarioReport {
                name: scenario.name.to_string(),
                outcome: Outcome::Failed(format!("skipped: {}", reason)),
                duration: Duration::ZERO,
            });
            continue;
        }

        let _span = tracing::info_span!("scenario", name = scenario.name).entered();
        let started = Instant::now();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| scenario.run(session))) {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(e)) => {
                if e.is_fatal() {
                    fatal = Some(e.to_string());
                }
                Outcome::Failed(e.to_string())
            },
            Err(payload) => Outcome::Failed(format!("panicked: {}", panic_message(payload.as_ref()))),
        };
        let duration = started.elapsed();

        match &outcome {
            Outcome::Passed => tracing::info!(?duration, "passed"),
            Outcome::Failed(message) => tracing::error!(?duration, "failed: {}", message),
        }
        report.scenarios.push(ScenarioReport {
            name: scenario.name.to_string(),
            outcome,
            duration,
        });
    }

    report
}

pub fn assert_type(actual: &ValueType, expected: &ValueType) -> HarnessResult<()> {
    if actual != expected {
        return Err(HarnessError::assertion(format!(
            "type mismatch: got {}, expected {}",
            actual, expected
        )));
    }
    Ok(())
}

/// Same type and bit-identical contents.
pub fn assert_values_eq(actual: &HostValue, expected: &HostValue) -> HarnessResult<()> {
    assert_type(&actual.value_type(), &expected.value_type())?;
    if actual != expected {
        return Err(HarnessError::assertion(format!(
            "values differ: got {}, expected {}",
            describe(actual),
            describe(expected)
        )));
    }
    Ok(())
}

/// Elementwise `|a - b| <= atol + rtol * |b|`.
pub fn assert_allclose(actual: &[f64], expected: &[f64], rtol: f64, atol: f64) -> HarnessResult<()> {
    if actual.len() != expected.len() {
        return Err(HarnessError::assertion(format!(
            "length mismatch: got {}, expected {}",
            actual.len(),
            expected.len()
        )));
    }
    for (i, (a, b)) in actual.iter().zip(expected).enumerate() {
        if (a - b).abs() > atol + rtol * b.abs() || a.is_nan() != b.is_nan() {
            return Err(HarnessError::assertion(format!(
                "element {} differs: got {}, expected {}",
                i, a, b
            )));
        }
    }
    Ok(())
}

/// Compare two values of the same type leaf by leaf with a tolerance.
pub fn assert_values_close(actual: &HostValue, expected: &HostValue, rtol: f64, atol: f64) -> HarnessResult<()> {
    assert_type(&actual.value_type(), &expected.value_type())?;
    match (actual, expected) {
        (HostValue::Tensor(a), HostValue::Tensor(b)) => assert_allclose(&a.to_f64_vec(), &b.to_f64_vec(), rtol, atol),
        (HostValue::Tuple(a), HostValue::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                assert_values_close(x, y, rtol, atol)?;
            }
            Ok(())
        },
        _ => Err(HarnessError::assertion("tensor/tuple mismatch")),
    }
}

fn describe(value: &HostValue) -> String {
    match value {
        HostValue::Tensor(lit) if lit.dtype().is_float() => format!("{:?}", lit.to_f64_vec()),
        HostValue::Tensor(lit) => format!("{:?}", lit.to_i64_vec()),
        HostValue::Tuple(elements) => {
            let inner: Vec<String> = elements.iter().map(describe).collect();
            format!("({})", inner.join(", "))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrt_core::{DType, Literal};

    #[test]
    fn test_allclose() {
        assert!(assert_allclose(&[1.0, 2.0], &[1.0, 2.0 + 1e-9], 1e-6, 0.0).is_ok());
        assert!(assert_allclose(&[1.0], &[1.1], 1e-6, 1e-6).is_err());
        assert!(assert_allclose(&[1.0], &[1.0, 2.0], 0.0, 0.0).is_err());
        assert!(assert_allclose(&[f64::NAN], &[0.0], 1.0, 1.0).is_err());
    }

    #[test]
    fn test_values_eq_checks_type_first() {
        let a: HostValue = Literal::vec1(&[1f32, 2.0]).into();
        let b: HostValue = Literal::vec1(&[1f64, 2.0]).into();
        match assert_values_eq(&a, &b) {
            Err(HarnessError::Assertion(msg)) => assert!(msg.contains("type mismatch")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(assert_values_eq(&a, &a.clone()).is_ok());
    }

    #[test]
    fn test_values_close_on_tuples() {
        let a = HostValue::tuple(vec![
            Literal::scalar(1f32).into(),
            Literal::filled(DType::F32, [2], 3.0).into(),
        ]);
        let mut b = a.clone();
        assert!(assert_values_close(&a, &b, 0.0, 0.0).is_ok());
        b = HostValue::tuple(vec![
            Literal::scalar(1f32).into(),
            Literal::filled(DType::F32, [2], 3.5).into(),
        ]);
        assert!(assert_values_close(&a, &b, 0.0, 0.1).is_err());
    }

    #[test]
    fn test_suite_report_counts() {
        let report = SuiteReport {
            scenarios: vec![
                ScenarioReport {
                    name: "a".into(),
                    outcome: Outcome::Passed,
                    duration: Duration::from_millis(3),
                },
                ScenarioReport {
                    name: "b".into(),
                    outcome: Outcome::Failed("boom".into()),
                    duration: Duration::ZERO,
                },
            ],
            teardown: None,
        };
        assert_eq!((report.passed(), report.failed()), (1, 1));
        assert!(!report.is_success());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenarios"][0]["outcome"]["status"], "passed");
        assert_eq!(json["scenarios"][0]["duration_ms"], 3.0);
        assert_eq!(json["scenarios"][1]["outcome"]["message"], "boom");
    }
}
