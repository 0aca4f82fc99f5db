use clap::{Parser, Subcommand};

mod commands;

use commands::{ConfigArgs, ReplayArgs, ScoreArgs};

#[derive(Parser)]
#[command(name = "rotator")]
#[command(about = "Exit, flip and rotation engine for leveraged positions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars through the engine with paper execution
    Replay(ReplayArgs),
    /// Rank symbols by opportunity score at the last bar
    Score(ScoreArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay(args) => commands::run_replay(args).await,
        Commands::Score(args) => commands::run_score(&args),
        Commands::Config(args) => commands::run_show_config(&args),
    }
}
