//! xrt client
//!
//! Drives an accelerator server from the host: spawns it, opens a
//! [`Session`], moves values to and from the device, compiles and executes
//! traced computations, and tears everything down in a fixed order.

pub mod client;
pub mod config;
pub mod error;
pub mod harness;
pub mod process;
pub mod scenario;
pub mod session;
pub mod suite;
pub mod target;

pub use client::{ClientError, RpcClient};
pub use config::{ConfigError, HarnessConfig};
pub use error::{HarnessError, HarnessResult};
pub use harness::{with_harness, Harness, HarnessRun, TeardownReport, TeardownStep};
pub use process::{ProcessError, ProcessKiller, ServerProcess};
pub use scenario::{run_scenarios, run_scenarios_until, Outcome, Scenario, ScenarioReport, SuiteReport};
pub use session::{DeviceValue, Executable, ReleaseSummary, Session, SessionOptions};
pub use target::{Target, TargetError, Transport};
