pub mod demo;
pub mod serve;
pub mod suite;
pub mod version;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use xrt_client::{Harness, HarnessConfig};

/// Set by the first Ctrl+C. Commands stop after the step in progress and
/// still run the normal teardown.
pub(crate) static INTERRUPTED: AtomicBool = AtomicBool::new(false);

pub(crate) fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Exit with the conventional SIGINT status once teardown has run.
pub(crate) fn exit_if_interrupted() {
    if interrupted() {
        crate::output::warning("interrupted");
        std::process::exit(130);
    }
}

/// Load configuration, then bootstrap with a Ctrl+C handler. The first
/// Ctrl+C only raises [`INTERRUPTED`]; a second one kills the spawned server
/// and exits without teardown.
pub(crate) fn bootstrap(config_path: Option<&Path>) -> Result<Harness, Box<dyn std::error::Error>> {
    let config = HarnessConfig::resolve(config_path)?;
    if config.spawn_server {
        crate::output::starting(&format!("{} ({})", config.server_binary().display(), config.target));
    } else {
        crate::output::starting(&format!("session at {}", config.target));
    }

    let harness = Harness::bootstrap(&config)?;
    let killer = harness.killer();
    ctrlc::set_handler(move || {
        if !INTERRUPTED.swap(true, Ordering::SeqCst) {
            eprintln!("\nInterrupted, tearing down after the current step (Ctrl+C again to force)...");
            return;
        }
        eprintln!("\nStopping server...");
        if let Some(killer) = &killer {
            let _ = killer.kill();
        }
        std::process::exit(130);
    })
    .ok();
    Ok(harness)
}
