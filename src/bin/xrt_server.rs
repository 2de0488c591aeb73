//! Standalone accelerator server.

#[path = "../logging.rs"]
mod logging;

use clap::Parser;
use xrt_server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "xrt_server")]
#[command(version, about = "xrt accelerator server")]
struct Args {
    /// Address to listen on (default: $XRT_SERVER_ADDR or 127.0.0.1:8470)
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Base seed for per-session random number generators
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() {
    logging::init();
    let args = Args::parse();

    let mut config = ServerConfig::default();
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.seed = args.seed;

    let result = Server::bind(&config).and_then(|server| server.run());
    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
