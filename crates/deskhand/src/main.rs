mod bootstrap_helpers;
mod startup_dispatch;

use anyhow::Result;
use clap::Parser;
use deskhand_cli::Cli;

use crate::bootstrap_helpers::init_tracing;
use crate::startup_dispatch::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
