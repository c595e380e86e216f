use clap::Parser;
use pmp_cache::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli::cache::run(cli.command, cli.store).await
}
