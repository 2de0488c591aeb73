//! Bootstrap and guaranteed teardown.
//!
//! [`Harness::bootstrap`] starts the server (unless the target is remote) and
//! opens a session. [`Harness::teardown`] runs exactly once, on the first
//! explicit call or on drop, in a fixed order: release device handles, close
//! the session, kill the server.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::process::{ProcessError, ProcessKiller, ServerProcess};
use crate::session::{Session, SessionOptions};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum TeardownStep {
    ReleaseHandles { buffers: usize, executables: usize },
    CloseSession,
    KillServer { killed: bool },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
    /// Failures of individual steps; later steps still ran.
    pub errors: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of [`Harness::run`]: the body's outcome (or its panic) and what
/// teardown did.
pub struct HarnessRun<T> {
    pub outcome: std::thread::Result<HarnessResult<T>>,
    pub teardown: TeardownReport,
}

impl<T> HarnessRun<T> {
    /// Return the body's result, resuming its panic if it had one.
    pub fn into_result(self) -> HarnessResult<T> {
        match self.outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

pub struct Harness {
    session: Session,
    process: Option<ServerProcess>,
    torn_down: bool,
}

impl Harness {
    pub fn bootstrap(config: &HarnessConfig) -> HarnessResult<Self> {
        let target = config.target()?;
        let mut process = if config.spawn_server {
            Some(ServerProcess::spawn(&config.server_binary(), &config.server_args)?)
        } else {
            tracing::info!(%target, "using remote accelerator");
            None
        };

        let options = SessionOptions {
            connect_timeout: config.connect_timeout(),
            seed: config.seed,
        };
        match Session::open(&target, &options) {
            Ok(session) => Ok(Self {
                session,
                process,
                torn_down: false,
            }),
            Err(e) => {
                // The launch failed if the server is already gone.
                let exited = process.as_ref().and_then(|p| p.exit_status());
                if let Some(p) = process.as_mut() {
                    if let Err(kill_error) = p.kill() {
                        tracing::warn!("{}", kill_error);
                    }
                }
                match exited {
                    Some(status) => Err(HarnessError::Process(ProcessError::Exited(status.to_string()))),
                    None => Err(e),
                }
            },
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::pid)
    }

    /// Kills the spawned server from another thread, e.g. a signal handler.
    pub fn killer(&self) -> Option<ProcessKiller> {
        self.process.as_ref().map(ServerProcess::killer)
    }

    /// Release handles, close the session, kill the server. Only the first
    /// call does anything.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        match self.session.release_all() {
            Ok(summary) => report.steps.push(TeardownStep::ReleaseHandles {
                buffers: summary.buffers,
                executables: summary.executables,
            }),
            Err(e) => {
                report.steps.push(TeardownStep::ReleaseHandles {
                    buffers: 0,
                    executables: 0,
                });
                report.errors.push(format!("release handles: {}", e));
            },
        }

        report.steps.push(TeardownStep::CloseSession);
        if let Err(e) = self.session.close() {
            report.errors.push(format!("close session: {}", e));
        }

        if let Some(process) = self.process.as_mut() {
            match process.kill() {
                Ok(killed) => report.steps.push(TeardownStep::KillServer { killed }),
                Err(e) => {
                    report.steps.push(TeardownStep::KillServer { killed: false });
                    report.errors.push(format!("kill server: {}", e));
                },
            }
        }

        for error in &report.errors {
            tracing::warn!("teardown: {}", error);
        }
        tracing::debug!(steps = report.steps.len(), "teardown complete");
        report
    }

    /// Bootstrap, run `body`, then tear down whatever happened in the body.
    /// Bootstrap failures are returned before any body runs.
    pub fn run<T, F>(config: &HarnessConfig, body: F) -> HarnessResult<HarnessRun<T>>
    where
        F: FnOnce(&Session) -> HarnessResult<T>,
    {
        let mut harness = Self::bootstrap(config)?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(harness.session())));
        let teardown = harness.teardown();
        Ok(HarnessRun { outcome, teardown })
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Run `body` against a fresh session; the session and server are torn down
/// afterwards, and the body's error or panic then propagates.
pub fn with_harness<T, F>(config: &HarnessConfig, body: F) -> HarnessResult<T>
where
    F: FnOnce(&Session) -> HarnessResult<T>,
{
    Harness::run(config, body)?.into_result()
}
