use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Only show logs with --verbose
    let filter = if cli.verbose {
        EnvFilter::new("planbridge=debug")
    } else {
        EnvFilter::new("planbridge=warn")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = || cli::load_config(&cli.config, cli.engine_bin.clone());

    match cli.command {
        Commands::Schema(args) => cli::schema::execute(args),
        Commands::Allocate(args) => cli::plan::allocate(&config()?, args).await,
        Commands::Adjust(args) => cli::plan::adjust(&config()?, args).await,
        Commands::Candidates(args) => cli::plan::candidates(&config()?, args).await,
        Commands::AddCrop(args) => cli::plan::add_crop(&config()?, args).await,
        Commands::Predict(args) => cli::query::predict(&config()?, args).await,
        Commands::Progress(args) => cli::query::progress(&config()?, args).await,
        Commands::Snapshot(args) => cli::snapshot::execute(&config()?, args).await,
        Commands::Plans => cli::snapshot::list(&config()?).await,
        Commands::Engine(args) => cli::engine::execute(&config()?, args).await,
    }
}
