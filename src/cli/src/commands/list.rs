//! `ocipeek list` — enumerate the files of a remote image.
//!
//! Every layer is walked top to bottom; upper layers shadow lower ones,
//! so each path appears exactly once.

use clap::Args;

use ocipeek_engine::{Orchestrator, RegistryAuth, RegistryClient};

use super::{cancel_on_ctrl_c, FormatArg};

#[derive(Args)]
pub struct ListArgs {
    /// Image reference (e.g. alpine:latest)
    pub image: String,

    /// Force a specific layer format
    #[arg(long, value_enum, default_value = "auto")]
    pub format: FormatArg,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn execute(args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.verbose {
        println!("Listing files in {}", args.image);
    }

    let cancel = cancel_on_ctrl_c();
    let orchestrator =
        Orchestrator::with_client(RegistryClient::with_auth(RegistryAuth::from_env()));

    let files = orchestrator
        .list(&args.image, args.format.into(), &cancel)
        .await?;

    for file in &files {
        println!("{file}");
    }
    if args.verbose {
        println!();
        println!("Total files: {}", files.len());
    }
    Ok(())
}
