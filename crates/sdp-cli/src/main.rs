//! Binary entry point for the `sdp` command.

use anyhow::Result;
use clap::Parser;

use sdp_cli::{dispatch_in, Cli};
use sdp_core::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.verbose);

    let cwd = std::env::current_dir()?;
    let code = dispatch_in(cli, &cwd).await?;
    std::process::exit(code);
}
