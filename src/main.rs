mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xrt")]
#[command(author, version, about = "Compile, run and verify tensor programs on an accelerator server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an accelerator server in the foreground
    Serve(commands::serve::ServeArgs),

    /// Run the built-in compile-run-assert scenarios
    Suite(commands::suite::SuiteArgs),

    /// Run a ResNet forward pass and a conv + relu gradient on the server
    Demo(commands::demo::DemoArgs),

    /// Show version information
    Version,
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::execute(args),
        Commands::Suite(args) => commands::suite::execute(args),
        Commands::Demo(args) => commands::demo::execute(args),
        Commands::Version => commands::version::execute(),
    };

    if let Err(e) = result {
        output::error(&e.to_string());
        std::process::exit(1);
    }
}
