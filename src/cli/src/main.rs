//! ocipeek CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ocipeek_cli::commands::{dispatch, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --verbose surfaces per-layer strategy progress from the engine.
    let default_filter = if cli.verbose() {
        "ocipeek=debug,ocipeek_engine=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
