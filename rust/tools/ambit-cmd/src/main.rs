use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod logging;
mod utils;

#[derive(Parser)]
#[command(name = "ambit-cmd")]
#[command(about = "Command-line utility for exercising ambit executors and contexts")]
#[command(version)]
struct Cli {
    /// Log level filter (e.g. "info", "ambit_executor=debug"); overrides AMBIT_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic pipeline of calls and events and print a JSON report
    Simulate {
        /// Number of calls to run
        #[arg(long, default_value_t = 8)]
        calls: usize,

        /// Message events delivered per call
        #[arg(long, default_value_t = 4)]
        messages: usize,

        /// Tasks dispatched to the executor per message event
        #[arg(long, default_value_t = 2)]
        fanout: usize,

        /// Upper bound of simulated work per task, in milliseconds
        #[arg(long, default_value_t = 5)]
        work_ms: u64,

        /// Start a nested call joined to the current call inside every task
        #[arg(long)]
        join: bool,

        /// Path to a JSON file with executor options
        #[arg(short, long)]
        config: Option<String>,

        /// Core worker count (overrides the config file)
        #[arg(long)]
        threads: Option<usize>,

        /// Bounded queue capacity (overrides the config file)
        #[arg(long)]
        queue_capacity: Option<usize>,
    },

    /// Validate an executor options file and print the effective options
    CheckConfig {
        /// Path to the JSON options file
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Simulate {
            calls,
            messages,
            fanout,
            work_ms,
            join,
            config,
            threads,
            queue_capacity,
        } => {
            let options = utils::load_options(config.as_deref(), threads, queue_capacity)?;
            commands::simulate::run(
                commands::simulate::Scenario {
                    calls,
                    messages,
                    fanout,
                    work_ms,
                    join,
                },
                options,
            )
        }
        Commands::CheckConfig { path } => commands::check_config::run(&path),
    }
}
