use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    contact_revert_cli::init_tracing();
    let cli = contact_revert_cli::Cli::parse();
    contact_revert_cli::run_cli(cli)
}
