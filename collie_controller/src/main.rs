//! # Collie Controller
//!
//! Entry point of the background controller process. Spawned by
//! `collie run`; attaches to the instance segment the supervisor created
//! and runs the supervised loop until told to stop.
//!
//! Exit codes: `0` on graceful shutdown, `2` on a crash request or startup
//! failure, `1` when the supervisor disappears.

use clap::Parser;
use collie_common::config::LogLevel;
use collie_common::consts::EXIT_CRASH;
use collie_controller::signals::process_inbox;
use collie_controller::{ConfigSource, Controller, ControllerOptions, IdleAction};
use collie_shared_memory::{ShmArena, ShmOptions};
use std::path::PathBuf;
use std::process;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Collie Controller: supervised background loop over the shared flag store
#[derive(Parser, Debug)]
#[command(name = "collie_controller")]
#[command(version)]
#[command(about = "Background controller process of the collie engine")]
struct Args {
    /// Path to the engine configuration TOML.
    #[arg(long, value_name = "FILE", default_value = "config/collie.toml")]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = ConfigSource::load(&args.config);
    let log_level = config
        .as_ref()
        .map(|c| c.config().shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    info!("Collie Controller v{} starting...", env!("CARGO_PKG_VERSION"));

    match config.map_err(Into::into).and_then(run) {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("FATAL: {e}");
            process::exit(EXIT_CRASH);
        }
    }
}

fn run(config: ConfigSource) -> Result<i32, Box<dyn std::error::Error>> {
    let shm_options = ShmOptions::from_config(&config.config().shmem);

    // The supervisor bootstraps the segment; never create it here.
    let arena = ShmArena::attach(&shm_options)?;

    let mut controller = Controller::start(
        config,
        &arena,
        process_inbox(),
        IdleAction,
        ControllerOptions::process(),
    )?;

    let exit = controller.run();
    info!("Collie Controller shutdown complete ({:?})", exit);
    Ok(exit.exit_code())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let directive: Directive = if args.verbose {
        Level::DEBUG.into()
    } else {
        log_level
            .as_directive()
            .parse()
            .unwrap_or_else(|_| Level::INFO.into())
    };

    let filter = EnvFilter::from_default_env().add_directive(directive);

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
