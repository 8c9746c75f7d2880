//! # Collie Engine
//!
//! Boots the instance's shared memory, supervises the controller process
//! and exposes the administrative commands.
//!
//! ```text
//! collie run                 bootstrap + supervise until SIGINT/SIGTERM
//! collie init                bootstrap only
//! collie flag get <id>
//! collie flag set <id> <value>
//! collie wake
//! collie barrier [--timeout-ms N]
//! collie status [--json-output]
//! ```

use clap::{Parser, Subcommand};
use collie::{Admin, Supervisor, bootstrap, controller_binary};
use collie_common::config::{EngineConfig, LogLevel};
use collie_common::consts::EXIT_FATAL;
use collie_shared_memory::{ShmArena, ShmOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Collie: shared flag store and supervised background controller
#[derive(Parser, Debug)]
#[command(name = "collie")]
#[command(version)]
#[command(about = "Collie engine supervisor and administration tool")]
struct Args {
    /// Path to the engine configuration TOML.
    #[arg(long, value_name = "FILE", default_value = "config/collie.toml", global = true)]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bootstrap shared memory and supervise the controller.
    Run,
    /// Bootstrap shared memory and exit.
    Init,
    /// Read or write a flag.
    Flag {
        #[command(subcommand)]
        op: FlagOp,
    },
    /// Wake the controller early.
    Wake,
    /// Emit a barrier and wait for the controller to absorb it.
    Barrier {
        /// Give up after this many milliseconds.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
    /// Print the instance state.
    Status {
        /// Print JSON instead of text.
        #[arg(long = "json-output")]
        json_output: bool,
    },
}

#[derive(Subcommand, Debug)]
enum FlagOp {
    /// Print flag `id`.
    Get { id: usize },
    /// Set flag `id` to `value`.
    Set { id: usize, value: u64 },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = EngineConfig::load_validated(&args.config);
    let log_level = config
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    let result = match config {
        Ok(config) => run(&args, config).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(EXIT_FATAL);
    }
}

async fn run(args: &Args, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        Command::Run => supervise(&config, &args.config).await,
        Command::Init => {
            bootstrap(&config.shmem)?;
            Ok(())
        }
        Command::Flag { op } => {
            let admin = Admin::attach(&config.shmem)?;
            match *op {
                FlagOp::Get { id } => println!("{}", admin.flag_get(id)?),
                FlagOp::Set { id, value } => {
                    admin.flag_set(id, value)?;
                    info!("Flag {} set to {}", id, value);
                }
            }
            Ok(())
        }
        Command::Wake => {
            let admin = Admin::attach(&config.shmem)?;
            if admin.wake() {
                info!("Controller woken");
            } else {
                info!("No controller running");
            }
            Ok(())
        }
        Command::Barrier { timeout_ms } => {
            let admin = Admin::attach(&config.shmem)?;
            let generation = admin.barrier(Duration::from_millis(*timeout_ms))?;
            println!("{generation}");
            Ok(())
        }
        Command::Status { json_output } => {
            let report = Admin::attach(&config.shmem)?.status()?;
            if *json_output {
                println!("{}", report.to_json()?);
            } else {
                print!("{report}");
            }
            Ok(())
        }
    }
}

async fn supervise(
    config: &EngineConfig,
    config_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("🚀 Starting {} v{}", config.shared.service_name, env!("CARGO_PKG_VERSION"));

    let boot = bootstrap(&config.shmem)?;
    let mut supervisor = Supervisor::new(
        controller_binary()?,
        config.watchdog.clone(),
        boot.shared.registration.clone(),
    );

    let mut terminate = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Unable to listen for Ctrl+C: {e}");
                }
            }
            _ = terminate.recv() => {}
        }
    };

    supervisor.run(config_path, shutdown).await?;
    drop(supervisor);
    drop(boot);

    ShmArena::remove(&ShmOptions::from_config(&config.shmem))?;
    info!("🏁 {} shutdown complete", config.shared.service_name);
    Ok(())
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
