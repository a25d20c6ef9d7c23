//! SmartAdmit CLI: admissions advice from a free-text student profile.
//!
//! Each command is one user action; runs are persisted so a pipeline can be
//! advanced, resumed, refined, and questioned across invocations.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
