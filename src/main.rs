use clap::Parser;
use superchain::cli::{self, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli::bootstrap(cli.log_level);

    match cli.command {
        Command::Chain => cli::chain::run().await,
        Command::Buckets => cli::buckets::run().await,
        Command::Exit => cli::buckets::run_exit().await,
    }
}
