use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LogSetupError {
    #[error("Logging already initialized")]
    AlreadyInitialized,
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("Failed to create log directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to create log file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),
    #[error("Logger initialization failed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Where and how verbosely to log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set, e.g. `"info"` or `"accord=debug"`.
    pub base_level: String,
    pub directory: PathBuf,
    pub file_prefix: String,
    /// Mirror log lines to stdout (warnings and errors also to stderr).
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: "info".to_string(),
            directory: PathBuf::from("logs"),
            file_prefix: "accord".to_string(),
            console: true,
        }
    }
}

/// Install the global tracing subscriber: env filter, optional console layer
/// and a daily rolling file layer.
pub fn setup_logging(config: &LogConfig) -> Result<(), LogSetupError> {
    if LOG_GUARD.get().is_some() {
        return Err(LogSetupError::AlreadyInitialized);
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.base_level).map_err(|source| {
            LogSetupError::InvalidFilter {
                filter: config.base_level.clone(),
                source,
            }
        })?,
    };

    std::fs::create_dir_all(&config.directory).map_err(|source| LogSetupError::CreateDir {
        path: config.directory.clone(),
        source,
    })?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .filename_suffix("log")
        .max_log_files(5)
        .build(&config.directory)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true)
            .with_writer(std::io::stdout.and(std::io::stderr.with_min_level(Level::WARN)))
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    LOG_GUARD
        .set(guard)
        .map_err(|_| LogSetupError::AlreadyInitialized)
}
