//! Suite command - run the built-in scenarios against a fresh session

use crate::output::{self, OutputFormat};
use clap::Args;
use std::path::PathBuf;
use xrt_client::{run_scenarios_until, suite, Scenario};

#[derive(Args)]
pub struct SuiteArgs {
    /// Config file (default: ~/.xrt/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Run only these scenarios (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub only: Vec<String>,

    /// List the scenarios and exit
    #[arg(long)]
    pub list: bool,
}

fn select(only: &[String]) -> Result<Vec<Scenario>, Box<dyn std::error::Error>> {
    if only.is_empty() {
        return Ok(suite::builtin());
    }
    only.iter()
        .map(|name| suite::find(name).ok_or_else(|| format!("Unknown scenario: {}", name).into()))
        .collect()
}

pub fn execute(args: SuiteArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.list {
        for scenario in suite::builtin() {
            println!("{:<18} {}", scenario.name, scenario.description);
        }
        return Ok(());
    }

    let scenarios = select(&args.only)?;
    let mut harness = super::bootstrap(args.config.as_deref())?;
    let session = harness.session().clone();
    output::running(&format!(
        "{} scenario(s) on session {} at {}",
        scenarios.len(),
        session.id(),
        session.target()
    ));

    let mut report = run_scenarios_until(&session, &scenarios, &super::INTERRUPTED);
    drop(session);
    report.teardown = Some(harness.teardown());

    output::print_suite_report(&report, args.format)?;
    super::exit_if_interrupted();
    if !report.is_success() {
        return Err(format!("{} scenario(s) failed", report.failed()).into());
    }
    Ok(())
}
