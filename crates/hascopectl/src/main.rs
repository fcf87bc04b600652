//! hascopectl - state history and error analysis for Home Assistant
//! recorder databases.
//!
//! Thin CLI over `hascope_core`: argument parsing, dispatch, rendering and
//! exit codes live here; all query and correlation logic lives in the core.

mod commands;
mod errors;
mod output;

use clap::{Parser, Subcommand};

use commands::errors::{ErrorsArgs, ErrorsFormat};
use commands::history::{HistoryArgs, HistoryFormat};

#[derive(Parser)]
#[command(name = "hascopectl")]
#[command(about = "State history and error analysis for Home Assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose progress and query diagnostics on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze state history for an entity (patterns with '*' allowed)
    History {
        /// Entity id to analyze (e.g. sensor.temperature)
        entity_id: String,

        /// History timeframe: Nm (minutes), Nh (hours), Nd (days), Nw (weeks)
        #[arg(long, short = 't')]
        timeframe: Option<String>,

        /// Start datetime (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long)]
        start: Option<String>,

        /// End datetime; requires --start
        #[arg(long)]
        end: Option<String>,

        /// Maximum number of records (-1 for no limit)
        #[arg(long, short = 'l', default_value_t = 100)]
        limit: i64,

        /// Include statistics (min/max/avg or state counts)
        #[arg(long, short = 's')]
        stats: bool,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value_t = HistoryFormat::Markdown)]
        format: HistoryFormat,
    },

    /// Analyze runtime errors, optionally correlated with state changes
    Errors {
        /// Show only the current live error log
        #[arg(long, short = 'c')]
        current: bool,

        /// Timeframe for persisted log analysis (e.g. 24h, 7d)
        #[arg(long, short = 'l')]
        log: Option<String>,

        /// Filter errors for an entity pattern
        #[arg(long, short = 'e')]
        entity: Option<String>,

        /// Filter errors by integration/component
        #[arg(long, short = 'i')]
        integration: Option<String>,

        /// Correlate errors with nearby state transitions
        #[arg(long)]
        correlation: bool,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value_t = ErrorsFormat::Markdown)]
        format: ErrorsFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::History { entity_id, timeframe, start, end, limit, stats, format } => {
            commands::history::run(
                HistoryArgs { entity_id, timeframe, start, end, limit, stats, format },
                cli.verbose,
            )
            .await
        }
        Commands::Errors { current, log, entity, integration, correlation, format } => {
            commands::errors::run(
                ErrorsArgs { current, log, entity, integration, correlation, format },
                cli.verbose,
            )
            .await
        }
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            errors::EXIT_GENERAL_ERROR
        }
    };
    std::process::exit(code);
}
