pub mod config;
pub mod next_reset;
pub mod simulate;
pub mod watch;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the break engine and print break events until interrupted")]
    Watch(watch::WatchArgs),
    #[command(about = "Replay an activity pattern on a simulated clock", arg_required_else_help = true)]
    Simulate(simulate::SimulateArgs),
    #[command(about = "Show when a daily reset fires next", arg_required_else_help = true)]
    NextReset(next_reset::NextResetArgs),
    #[command(about = "Show or edit settings", arg_required_else_help = true)]
    Config(config::ConfigArgs),
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help(true))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub async fn menu() -> Result<()> {
        let cli = Self::parse();
        match cli.command {
            Commands::Watch(args) => watch::cmd(args).await,
            Commands::Simulate(args) => simulate::cmd(args),
            Commands::NextReset(args) => next_reset::cmd(args),
            Commands::Config(args) => config::cmd(args),
        }
    }
}
