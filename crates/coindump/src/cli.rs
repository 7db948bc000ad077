use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sets the level of tracing (defaults to INFO).
    #[arg(short, long, global = true)]
    pub trace: Option<TraceLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute one run of the pipeline: check the API, fetch prices, save them.
    Run {
        /// Save to an in-memory warehouse instead of PostgreSQL (postgres_dwh).
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the pipeline every 10 minutes until interrupted.
    Schedule {
        /// Save to an in-memory warehouse instead of PostgreSQL (postgres_dwh).
        #[arg(long)]
        dry_run: bool,
    },

    /// Only check that the CoinGecko API is reachable.
    Check,

    /// Only fetch the current prices and print them.
    Fetch,
}

#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
#[clap(rename_all = "UPPERCASE")]
pub enum TraceLevel {
    DEBUG,
    ERROR,
    INFO,
    TRACE,
    WARN,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_trace_level() {
        let cli = Cli::try_parse_from(["coindump", "run", "--dry-run", "--trace", "DEBUG"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { dry_run: true }));
        assert_eq!(cli.trace, Some(TraceLevel::DEBUG));
    }

    #[test]
    fn schedule_defaults_to_postgres() {
        let cli = Cli::try_parse_from(["coindump", "schedule"]).unwrap();
        assert!(matches!(cli.command, Commands::Schedule { dry_run: false }));
        assert_eq!(cli.trace, None);
    }

    #[test]
    fn rejects_unknown_commands() {
        assert!(Cli::try_parse_from(["coindump", "backfill"]).is_err());
    }
}
