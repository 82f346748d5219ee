// triage: sort a folder of images into left / right / down folders from the
// terminal. Reads h/j/k/l commands from stdin, prints progress after each.
// Usage: cargo run --release -- [--source DIR --left DIR --right DIR]

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("GIT_HASH");
const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use triage::config::{self, AppConfig};
use triage::logging::{self, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "triage", about = "Image triage: sort photos with three keys", version = LONG_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./config.json, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sort images interactively (default)
    Run(RunArgs),
    /// List candidates in presentation order
    Scan { path: Option<PathBuf> },
    /// Print the resolved configuration
    Config,
}

/// Overrides for the folders in the config file.
#[derive(Args, Debug, Default)]
struct RunArgs {
    #[arg(long)]
    source: Option<PathBuf>,
    #[arg(long)]
    left: Option<PathBuf>,
    #[arg(long)]
    right: Option<PathBuf>,
    #[arg(long)]
    down: Option<PathBuf>,
}

impl RunArgs {
    fn apply(self, config: &mut AppConfig) {
        if self.source.is_some() {
            config.source_path = self.source;
        }
        if self.left.is_some() {
            config.left_path = self.left;
        }
        if self.right.is_some() {
            config.right_path = self.right;
        }
        if self.down.is_some() {
            config.down_path = self.down;
        }
    }
}

fn main() -> ExitCode {
    let args = Cli::parse();

    // ── Logging ─────────────────────────────────────────────────────────
    let log = LogConfig::from_verbosity(args.verbose).with_log_file(args.log_file.clone());
    if let Err(e) = logging::init_logging(&log) {
        eprintln!("triage: cannot start logging: {}", e);
        return ExitCode::FAILURE;
    }
    info!("triage {} ({})", VERSION, GIT_HASH);

    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("triage: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Cli) -> anyhow::Result<()> {
    // ── Config ──────────────────────────────────────────────────────────
    let config_path = args.config.unwrap_or_else(config::default_config_path);
    let mut config = AppConfig::load_or_default(&config_path);

    match args.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(overrides) => {
            overrides.apply(&mut config);
            cli::run(&config)
        }
        Commands::Scan { path } => {
            cli::scan(&config, path.as_deref());
            Ok(())
        }
        Commands::Config => cli::show_config(&config_path, &config),
    }
}
