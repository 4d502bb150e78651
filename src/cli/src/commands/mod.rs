//! CLI command definitions and dispatch.

mod extract;
mod list;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;

use ocipeek_engine::LayerFormat;

/// Extract files from remote OCI images without pulling, mounting, or
/// running them.
#[derive(Parser)]
#[command(name = "ocipeek", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Extract a file from an OCI image
    Extract(extract::ExtractArgs),
    /// List all files in an OCI image
    List(list::ListArgs),
}

impl Cli {
    /// Whether the selected command asked for verbose output.
    pub fn verbose(&self) -> bool {
        match &self.command {
            Command::Extract(args) => args.verbose,
            Command::List(args) => args.verbose,
        }
    }
}

/// Dispatch the parsed command line.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Extract(args) => extract::execute(args).await,
        Command::List(args) => list::execute(args).await,
    }
}

/// `--format` choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Detect the layer format and fall back automatically
    Auto,
    /// eStargz (seekable tar.gz with embedded TOC)
    Estargz,
    /// SOCI (zTOC index stored as a registry artifact)
    Soci,
    /// Standard streaming extraction
    Standard,
}

impl From<FormatArg> for Option<LayerFormat> {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Auto => None,
            FormatArg::Estargz => Some(LayerFormat::EStargz),
            FormatArg::Soci => Some(LayerFormat::Soci),
            FormatArg::Standard => Some(LayerFormat::StandardGzip),
        }
    }
}

/// A token that cancels on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
