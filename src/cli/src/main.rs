//! skiff CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skiff_cli::commands::{dispatch, Cli};

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(if cli.globals.verbose { "debug" } else { "info" })
            }),
        )
        .with_target(false)
        .init();

    if let Err(e) = dispatch(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
