//! Cargo-style output formatting

use clap::ValueEnum;
use std::time::Duration;
use xrt_client::{Outcome, SuiteReport};

/// ANSI color codes
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD_GREEN: &str = "\x1b[1;32m";
    pub const BOLD_CYAN: &str = "\x1b[1;36m";
    pub const BOLD_YELLOW: &str = "\x1b[1;33m";
    pub const BOLD_RED: &str = "\x1b[1;31m";
}

/// Report format for `suite` and `demo`
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// One status line per scenario
    #[default]
    Pretty,
    /// The whole report as JSON on stdout
    Json,
}

/// Check if terminal supports colors
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err() && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

/// Format: "   {status} {message}"
fn print_status(status: &str, color: &str, message: &str) {
    if supports_color() {
        eprintln!("{}{:>12}{} {}", color, status, colors::RESET, message);
    } else {
        eprintln!("{:>12} {}", status, message);
    }
}

pub fn starting(message: &str) {
    print_status("Starting", colors::BOLD_CYAN, message);
}

pub fn compiling(message: &str) {
    print_status("Compiling", colors::BOLD_GREEN, message);
}

pub fn running(message: &str) {
    print_status("Running", colors::BOLD_GREEN, message);
}

pub fn passed(message: &str) {
    print_status("Passed", colors::BOLD_GREEN, message);
}

pub fn failed(message: &str) {
    print_status("Failed", colors::BOLD_RED, message);
}

pub fn finished(message: &str) {
    print_status("Finished", colors::BOLD_GREEN, message);
}

pub fn warning(message: &str) {
    print_status("Warning", colors::BOLD_YELLOW, message);
}

pub fn error(message: &str) {
    print_status("Error", colors::BOLD_RED, message);
}

/// Format duration in human readable form
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.2}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let secs = secs % 60.0;
        format!("{:.0}m {:.2}s", mins, secs)
    }
}

pub fn print_suite_report(report: &SuiteReport, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        },
        OutputFormat::Pretty => {
            for scenario in &report.scenarios {
                let line = format!("{} ({})", scenario.name, format_duration(scenario.duration));
                match &scenario.outcome {
                    Outcome::Passed => passed(&line),
                    Outcome::Failed(message) => failed(&format!("{}: {}", line, message)),
                }
            }
            if let Some(teardown) = &report.teardown {
                for error in &teardown.errors {
                    warning(&format!("teardown: {}", error));
                }
            }
            let total: Duration = report.scenarios.iter().map(|s| s.duration).sum();
            finished(&format!(
                "{} passed, {} failed in {}",
                report.passed(),
                report.failed(),
                format_duration(total)
            ));
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5.00s");
    }
}
