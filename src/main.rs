//! herakles-sampler
//!
//! Host metrics sampler with tracing logging.
//! This is the main entry point that runs the collection loop and handles subcommands.

mod cli;
mod commands;
mod config;
mod history;
mod scheduler;

use anyhow::Context;
use clap::Parser;
use herakles_sampler::Collector;
use std::path::Path;
use std::time::Duration;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use cli::{Args, Commands, LogLevel};
use commands::{command_check, command_config, command_test};
use config::{resolve_config, show_config, validate_effective_config, Config};
use history::History;
use scheduler::{build_collectors, run_cycle};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let log_level = config
        .log_level
        .as_deref()
        .map(str::parse::<LogLevel>)
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or(LogLevel::Info);

    let filter = match log_level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    // Reports go to stdout, logs to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging initialized with level: {:?}", log_level);
    Ok(())
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> anyhow::Result<Config> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {:#}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Save the state of all collectors. Failures only cost continuity.
fn persist(history: &mut History, collectors: &[Box<dyn Collector>], path: &Path) {
    history.record_all(collectors);
    if let Err(e) = history.save(path) {
        warn!("Could not write history file: {:#}", e);
    }
}

/// Resolves once SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {:#}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        // Writing a default config needs no valid config
        if let Commands::Config {
            output,
            format,
            commented,
        } = command
        {
            return command_config(output.clone(), *format, *commented);
        }

        let config = load_validated_config(&args)?;
        setup_logging(&config)?;

        return match command {
            Commands::Check { proc, all } => command_check(*proc, *all, &config),

            Commands::Test {
                iterations,
                delay,
                verbose,
                format,
            } => command_test(*iterations, *delay, *verbose, *format, &config),

            Commands::Config { .. } => unreachable!("Config handled above"),
        };
    }

    let config = load_validated_config(&args)?;
    setup_logging(&config)?;

    info!("Starting herakles-sampler");

    // Configure parallel processing
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
            debug!("Rayon thread pool configured with {} threads", threads);
        }
    }

    let mut collectors = build_collectors(&config)?;

    let state_file = config.state_file();
    let mut history = if args.no_state {
        info!("History file disabled, all collectors start cold");
        History::default()
    } else {
        match History::load(&state_file) {
            Ok(history) => history,
            Err(e) => {
                warn!("Ignoring unreadable history: {:#}", e);
                History::default()
            }
        }
    };
    history.restore_all(&mut collectors);

    let interval = Duration::from_secs(config.interval());
    info!(
        "Collecting every {}s, state in {}",
        interval.as_secs(),
        state_file.display()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = tokio::task::block_in_place(|| run_cycle(&mut collectors));
                println!("{}", serde_json::to_string(&report)?);

                if !args.no_state {
                    persist(&mut history, &collectors, &state_file);
                }
                if args.once {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, exiting...");
                if !args.no_state {
                    persist(&mut history, &collectors, &state_file);
                }
                break;
            }
        }
    }

    info!("herakles-sampler stopped");
    Ok(())
}
