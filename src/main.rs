//! bibrunner - test-bench orchestration service
//!
//! Watches a directory of equipment descriptions and drives every bench it
//! finds until interrupted.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use bibrunner_core::cli::{print_exit_codes, render, OutputFormat};
use bibrunner_core::{
    load_equipment, run_cycle, AppConfig, CliResult, ControllerContext, DefaultResolver,
    ExitCodes, LoggingSettings, MultiEquipmentResult, PortReservationTable, Registry, SignalBoard,
    SimulatedUut, WorkflowExecutor,
};

/// bibrunner CLI
#[derive(Parser, Debug)]
#[command(
    name = "bibrunner",
    version,
    about = "Concurrent test-bench orchestration for BIB equipment",
    long_about = None
)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "BIBRUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write daily rolling log files here
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory and run every described bench
    Run {
        /// Directory of equipment descriptions
        #[arg(short, long)]
        watch_dir: Option<PathBuf>,
    },

    /// Check equipment descriptions without running them
    Validate {
        /// Description files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run a single cycle of one description and print the result
    Once {
        /// Description file
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show exit codes
    ExitCodes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_settings(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let logging = logging_settings(&cli, &config.logging);
    let _guard = match init_logging(&logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(ExitCodes::ERROR);
        }
    };

    let result = match cli.command {
        Commands::Run { watch_dir } => run_service(&config, watch_dir).await,
        Commands::Validate { files } => Ok(validate_files(&files)),
        Commands::Once { file, format } => run_once(&config, &file, format).await,
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    };

    match result {
        Ok(outcome) => {
            if let CliResult::Error(_, msg) = &outcome {
                eprintln!("{msg}");
            }
            outcome.to_exit_code()
        }
        Err(err) => {
            tracing::error!(error = %err, "bibrunner failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(ExitCodes::ERROR)
        }
    }
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display())),
        None => AppConfig::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn logging_settings(cli: &Cli, base: &LoggingSettings) -> LoggingSettings {
    let mut settings = base.clone();
    if cli.verbose {
        settings.level = "debug".to_string();
    }
    if cli.quiet {
        settings.level = "error".to_string();
    }
    settings.json |= cli.log_json;
    if cli.log_dir.is_some() {
        settings.directory.clone_from(&cli.log_dir);
    }
    settings
}

/// Install the global subscriber; the guard flushes the file writer on drop
fn init_logging(settings: &LoggingSettings) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .context("invalid log level")?;

    let (file_layer, guard) = match &settings.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "bibrunner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = if settings.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(guard)
}

fn build_context(config: &AppConfig) -> ControllerContext {
    let board = Arc::new(SignalBoard::new());
    let executor = WorkflowExecutor::new(PortReservationTable::new(), board.clone())
        .with_critical_output(&config.hardware.critical_output, config.critical_hold());
    ControllerContext::new(
        executor,
        Arc::new(DefaultResolver::new(SimulatedUut::new())),
        board,
        config.trigger_settings(),
    )
}

async fn run_service(config: &AppConfig, watch_dir: Option<PathBuf>) -> anyhow::Result<CliResult> {
    let Some(dir) = watch_dir.or_else(|| config.watch_dir.clone()) else {
        return Ok(CliResult::error(ExitCodes::INVALID_ARGS, "no watch directory configured"));
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("cannot create {}", dir.display()))?;

    tracing::info!(version = bibrunner_core::VERSION, dir = %dir.display(), "starting bibrunner");

    let registry = Registry::new(build_context(config));
    let cancel = CancellationToken::new();
    let watch = registry.spawn_watch(dir, config.watcher_settings(), cancel.clone());

    let mut reports = registry.subscribe();
    let mut summary = MultiEquipmentResult::new();
    let monitor_cancel = cancel.clone();
    let monitor = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = monitor_cancel.cancelled() => break,
                report = reports.recv() => match report {
                    Ok(report) => {
                        tracing::info!(
                            equipment = %report.equipment_id,
                            cycle = report.cycle,
                            level = %report.result.highest_level,
                            duration_ms = report.result.duration_ms,
                            "cycle complete"
                        );
                        summary.record(&report);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "report stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        summary
    });

    tokio::signal::ctrl_c().await.context("cannot listen for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    registry.shutdown().await;
    match watch.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "watcher failed"),
        Err(err) => tracing::error!(error = %err, "watcher task panicked"),
    }

    let summary = monitor.await.unwrap_or_default();
    if !summary.equipment.is_empty() {
        println!("{summary}");
    }
    Ok(CliResult::success_with_message("stopped"))
}

fn validate_files(files: &[PathBuf]) -> CliResult {
    let mut rejected = 0usize;
    for file in files {
        match load_equipment(file) {
            Ok(config) => println!(
                "{}: ok ({} units, {} ports)",
                file.display(),
                config.units.len(),
                config.units.iter().map(|u| u.ports.len()).sum::<usize>()
            ),
            Err(err) => {
                rejected += 1;
                println!("{err}");
            }
        }
    }

    if rejected == 0 {
        CliResult::success()
    } else {
        CliResult::error(
            ExitCodes::CONFIG_ERROR,
            format!("{rejected} of {} descriptions rejected", files.len()),
        )
    }
}

async fn run_once(config: &AppConfig, file: &Path, format: OutputFormat) -> anyhow::Result<CliResult> {
    let equipment = match load_equipment(file) {
        Ok(equipment) => equipment,
        Err(err) => return Ok(err.into()),
    };

    let ctx = build_context(config);
    let mut injected = None;
    let result = run_cycle(&ctx, &equipment, &mut injected, &CancellationToken::new()).await;

    println!("{}", render(&result, format)?);
    Ok(CliResult::from_cycle(&result))
}
