//! `ocipeek extract` — pull one file out of a remote image.
//!
//! Walks the image's layers top to bottom and uses the cheapest
//! applicable method per layer: eStargz TOC, SOCI zTOC, zstd:chunked
//! TOC, or a streaming tar walk.

use std::path::{Path, PathBuf};

use clap::Args;

use ocipeek_engine::{ExtractRequest, Orchestrator, RegistryAuth, RegistryClient};

use super::{cancel_on_ctrl_c, FormatArg};

#[derive(Args)]
pub struct ExtractArgs {
    /// Image reference (e.g. alpine:latest, ghcr.io/org/app:v1)
    pub image: String,

    /// Path of the file inside the image (e.g. /etc/os-release)
    pub file_path: String,

    /// Output path (default: the file's basename in the current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Force a specific layer format
    #[arg(long, value_enum, default_value = "auto")]
    pub format: FormatArg,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn execute(args: ExtractArgs) -> Result<(), Box<dyn std::error::Error>> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.file_path));

    if args.verbose {
        println!("Extracting {} from {}", args.file_path, args.image);
        println!("Output: {}", output.display());
    }

    let cancel = cancel_on_ctrl_c();
    let orchestrator =
        Orchestrator::with_client(RegistryClient::with_auth(RegistryAuth::from_env()));

    let request = ExtractRequest {
        image: args.image.clone(),
        path: args.file_path.clone(),
        output: output.clone(),
        format: args.format.into(),
    };
    orchestrator.extract(&request, &cancel).await?;

    println!(
        "Successfully extracted {} to {}",
        args.file_path,
        output.display()
    );
    Ok(())
}

/// Default output path: the requested file's basename in the current
/// directory.
fn default_output(file_path: &str) -> PathBuf {
    Path::new(file_path)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("extracted"))
}
