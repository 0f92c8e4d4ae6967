mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::ConfigArgs;

#[derive(Parser)]
#[command(
    name = "arbor",
    about = "Run trees of composable actions described in configuration files",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the configured plan and run it to completion
    Run {
        /// Print the merged configuration first
        #[arg(short = 'p', long)]
        print: bool,

        /// Load (and print) the configuration without running anything
        #[arg(short = 'n', long = "dry-run")]
        dry_run: bool,
    },

    /// Print the merged configuration
    Config,

    /// Validate the plan and show its structure
    Check {
        /// Also run the plan on a virtual clock and report the outcome
        #[arg(long)]
        simulate: bool,

        /// Virtual time after which a simulation gives up, in milliseconds
        #[arg(long, value_name = "MS", default_value_t = 3_600_000)]
        limit_ms: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let loaded = cmd::load(&cli.config);

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    let level = loaded
        .as_ref()
        .ok()
        .and_then(|l| l.app.log.level.as_deref())
        .and_then(|level| level.parse::<tracing::Level>().ok())
        .unwrap_or(default_level);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = loaded.and_then(|loaded| match cli.command {
        Commands::Run { print, dry_run } => cmd::run::run(&loaded, print, dry_run, cli.json),
        Commands::Config => cmd::config::run(&loaded, cli.json),
        Commands::Check { simulate, limit_ms } => {
            cmd::check::run(&loaded, simulate, limit_ms, cli.json)
        }
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
