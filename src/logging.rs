use std::io::IsTerminal;
use tracing_subscriber::{fmt, EnvFilter};

/// Log to stderr, filtered by `XRT_LOG` (default `info`).
pub fn init() {
    let filter = EnvFilter::try_from_env("XRT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .try_init();
}
