mod config;
mod db;
mod deletion;
mod models;
mod observability;
mod services;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PurgeConfig,
    deletion::{DeletionEngine, DenyFiles, EngineSettings},
    services::ValidationService,
};

/// CLI arguments for archive-purge
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Removes archived observation data named by deletion requests",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "archive-purge.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Process every pending deletion request once, oldest first
    Run {
        /// Only consider these request ids (comma-separated)
        #[arg(long, value_parser = parse_ids)]
        ids: Option<RequestIds>,
        /// Log what would be deleted without touching the catalogue or storage
        #[arg(long)]
        dry_run: bool,
        /// Print the run summary as JSON on stdout
        #[arg(long)]
        json: bool,
        /// File listing filenames (one per line) that must not be deleted
        #[arg(long)]
        incomplete_list: Option<PathBuf>,
        /// Process requests even when they contain protected observations
        #[arg(long)]
        force: bool,
    },
    /// Run repeatedly at `deletion.interval_secs` until interrupted
    Watch {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        incomplete_list: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Delete a single file of an observation
    DeleteFile {
        #[arg(long)]
        observation: i64,
        #[arg(long)]
        filename: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        incomplete_list: Option<PathBuf>,
    },
    /// Delete every unprotected file of an observation and mark it deleted
    DeleteObservation {
        #[arg(long)]
        observation: i64,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        incomplete_list: Option<PathBuf>,
    },
    /// Run database migrations and exit
    Migrate,
}

/// Switches that override or extend the config file.
#[derive(Debug, Default, Clone, Copy)]
struct Overrides<'a> {
    dry_run: bool,
    force: bool,
    incomplete_list: Option<&'a Path>,
}

/// Validated, de-duplicated request ids from `--ids`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestIds(Vec<i64>);

fn parse_ids(value: &str) -> Result<RequestIds, String> {
    let mut ids = Vec::new();
    for token in value.split(',').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        match token.parse::<i64>() {
            Ok(id) if id > 0 => ids.push(id),
            _ => return Err(format!("invalid request id '{token}'")),
        }
    }
    if ids.is_empty() {
        return Err("no request ids given".to_string());
    }
    ids.sort_unstable();
    ids.dedup();
    Ok(RequestIds(ids))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Command::Run {
            ids,
            dry_run,
            json,
            incomplete_list,
            force,
        } => {
            let ids = ids.map(|RequestIds(ids)| ids);
            let overrides = Overrides {
                dry_run,
                force,
                incomplete_list: incomplete_list.as_deref(),
            };
            run_once(&args.config, ids.as_deref(), json, overrides).await;
        }
        Command::Watch {
            dry_run,
            incomplete_list,
            force,
        } => {
            let overrides = Overrides {
                dry_run,
                force,
                incomplete_list: incomplete_list.as_deref(),
            };
            run_watch(&args.config, overrides).await;
        }
        Command::DeleteFile {
            observation,
            filename,
            dry_run,
            incomplete_list,
        } => {
            let overrides = Overrides {
                dry_run,
                incomplete_list: incomplete_list.as_deref(),
                ..Default::default()
            };
            let (_, engine) = setup(&args.config, overrides).await;
            let result = engine.delete_single_file(observation, &filename).await;
            report_single(result);
        }
        Command::DeleteObservation {
            observation,
            dry_run,
            incomplete_list,
        } => {
            let overrides = Overrides {
                dry_run,
                incomplete_list: incomplete_list.as_deref(),
                ..Default::default()
            };
            let (_, engine) = setup(&args.config, overrides).await;
            let result = engine.delete_single_observation(observation).await;
            report_single(result);
        }
        Command::Migrate => {
            run_migrate(&args.config).await;
        }
    }
}

fn load_config(config_path: &Path) -> PurgeConfig {
    let config = match PurgeConfig::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    config
}

async fn connect_database(config: &PurgeConfig) -> db::CatalogueDb {
    let database = match db::CatalogueDb::connect(&config.database).await {
        Ok(database) => database,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if config.database.migrate_on_start
        && let Err(e) = database.migrate().await
    {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = database.ping().await {
        tracing::error!(error = %e, "Database health check failed");
        eprintln!("Error: Database health check failed: {}", e);
        std::process::exit(1);
    }

    database
}

/// Read a list of filenames, one per line. Blank lines and `#` comments are
/// skipped.
fn load_incomplete_list(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Load config, connect to the catalogue and storage, and build the engine.
async fn setup(config_path: &Path, overrides: Overrides<'_>) -> (PurgeConfig, DeletionEngine) {
    let config = load_config(config_path);

    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        eprintln!("Failed to initialize metrics: {}", e);
        std::process::exit(1);
    }

    let mut settings = EngineSettings::from(&config.deletion);
    settings.dry_run |= overrides.dry_run;
    settings.force = overrides.force;

    tracing::info!(
        config_file = %config_path.display(),
        dry_run = settings.dry_run,
        batch_size = settings.batch_size,
        protected_file_types = ?settings.protected_file_types,
        force = settings.force,
        "Starting archive-purge"
    );

    let database = connect_database(&config).await;

    let backends = match services::create_storage_backends(&config.storage, settings.dry_run).await {
        Ok(backends) => backends,
        Err(e) => {
            tracing::error!(error = %e, "Failed to configure storage backends");
            eprintln!("Error: Failed to configure storage backends: {}", e);
            std::process::exit(1);
        }
    };
    if backends.is_empty() {
        tracing::warn!("No storage locations configured, every batch will fail");
    } else {
        tracing::info!(locations = backends.len(), "Storage backends ready");
    }

    let mut engine = DeletionEngine::new(database.catalogue(), backends, settings)
        .with_shutdown(shutdown_token());

    if let Some(validation) = &config.deletion.validation {
        tracing::info!(url = %validation.url, "Validating request observations");
        engine = engine.with_validator(Arc::new(ValidationService::new(
            reqwest::Client::new(),
            validation,
        )));
    }

    if let Some(path) = overrides.incomplete_list {
        match load_incomplete_list(path) {
            Ok(filenames) => {
                tracing::info!(
                    path = %path.display(),
                    files = filenames.len(),
                    "Loaded incomplete file list"
                );
                engine = engine.with_guard(Arc::new(DenyFiles::new(filenames)));
            }
            Err(e) => {
                eprintln!(
                    "Failed to read incomplete file list {}: {}",
                    path.display(),
                    e
                );
                std::process::exit(1);
            }
        }
    }

    (config, engine)
}

async fn run_once(config_path: &Path, ids: Option<&[i64]>, json: bool, overrides: Overrides<'_>) {
    let (_, engine) = setup(config_path, overrides).await;

    let summary = match engine.run(ids).await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!(error = %e, "Deletion run failed");
            eprintln!("Error: Deletion run failed: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        print_json(&summary);
    }

    if summary.has_failures() {
        std::process::exit(1);
    }
}

async fn run_watch(config_path: &Path, overrides: Overrides<'_>) {
    let (config, engine) = setup(config_path, overrides).await;
    let interval = Duration::from_secs(config.deletion.interval_secs);
    let shutdown = engine.shutdown().clone();

    tracing::info!(
        interval_secs = config.deletion.interval_secs,
        "Watching for deletion requests"
    );

    loop {
        match engine.run(None).await {
            Ok(summary) if summary.has_failures() => {
                tracing::warn!(
                    failed = summary.count("failed"),
                    interrupted = summary.interrupted,
                    "Deletion run finished with failures"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Deletion run failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    tracing::info!("Watch stopped");
}

fn report_single<T: Serialize + std::fmt::Debug>(result: deletion::DeletionResult<T>) {
    match result {
        Ok(outcome) => {
            tracing::info!(outcome = ?outcome, "Deletion finished");
            print_json(&outcome);
        }
        Err(e) => {
            tracing::error!(error = %e, "Deletion failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize output: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_migrate(config_path: &Path) {
    let config = load_config(config_path);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    let database = match db::CatalogueDb::connect(&config.database).await {
        Ok(database) => database,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = database.migrate().await {
        tracing::error!(error = %e, "Database migrations failed");
        eprintln!("Error: Database migrations failed: {}", e);
        std::process::exit(1);
    }
}

/// Token cancelled on Ctrl+C or SIGTERM.
///
/// The engine checks it before every batch, so a batch in flight finishes.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Shutdown signal received, finishing the current batch");
        trigger.cancel();
    });
    token
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
