//! Serve command - run an accelerator server in the foreground

use crate::output;
use clap::Args;
use xrt_server::{Server, ServerConfig};

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on (default: $XRT_SERVER_ADDR or 127.0.0.1:8470)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Base seed for per-session random number generators
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

pub fn execute(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.seed = args.seed;

    let server = Server::bind(&config)?;
    let handle = server.handle();
    ctrlc::set_handler(move || {
        eprintln!();
        handle.shutdown();
    })
    .ok();

    output::running(&format!("xrt server on {}", server.local_addr()));
    server.run()?;
    output::finished("server stopped");
    Ok(())
}
