//! Entrypoint for CLI

use clap::Parser;
mod cli;
mod logging;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()?;
    Ok(())
}
