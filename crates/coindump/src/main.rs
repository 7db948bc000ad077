mod cli;
mod spider;

// remote imports
use clap::Parser;
use cli::{Cli, TraceLevel};
use tracing::{subscriber, trace, Level};
use tracing_subscriber::FmtSubscriber;

////////////////////////////////////////////////////////////////////////////

// preprocess the trace level, and open the .env file
fn preprocess(trace_level: Level) -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber)?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // set the trace level
    preprocess(match cli.trace {
        Some(TraceLevel::DEBUG) => Level::DEBUG,
        Some(TraceLevel::ERROR) => Level::ERROR,
        Some(TraceLevel::INFO) | None => Level::INFO,
        Some(TraceLevel::TRACE) => Level::TRACE,
        Some(TraceLevel::WARN) => Level::WARN,
    })?;
    trace!("command line input recorded: {cli:?}");

    // read cli inputs
    use cli::Commands::*;
    match cli.command {
        // `coindump run [--dry-run]`: one pipeline run
        Run { dry_run } => spider::run(dry_run).await?,

        // `coindump schedule [--dry-run]`: a run every 10 minutes
        Schedule { dry_run } => spider::schedule(dry_run).await?,

        // `coindump check`: availability check only
        Check => spider::check().await?,

        // `coindump fetch`: price fetch only
        Fetch => spider::fetch().await?,
    }

    Ok(())
}
