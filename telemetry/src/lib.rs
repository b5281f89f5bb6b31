use thiserror::Error;
use tracing::subscriber::{set_global_default, SetGlobalDefaultError};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, InitError},
};
use tracing_log::{log_tracer::SetLoggerError, LogTracer};
use tracing_subscriber::{fmt, EnvFilter, FmtSubscriber};

const DEV_ENV_NAME: &str = "dev";
const PROD_ENV_NAME: &str = "prod";

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to build rolling file appender: {0}")]
    InitAppender(#[from] InitError),

    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

#[must_use]
pub enum LogFlusher {
    Flusher(WorkerGuard),
    NullFlusher,
}

/// Initializes tracing for the given binary.
///
/// In `prod` log lines go to daily-rolling JSON files under `logs/`, in every
/// other environment they go to the terminal in a human-readable format.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    // Route records emitted through the `log` facade by our dependencies into
    // the `tracing` subscriber.
    LogTracer::init()?;

    let is_prod =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEV_ENV_NAME.into()) == PROD_ENV_NAME;

    // Default to `info` unless RUST_LOG says otherwise.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_flusher = if is_prod {
        configure_prod_tracing(app_name, filter)?
    } else {
        configure_dev_tracing(filter)?
    };

    // The flusher must be held until exit so buffered lines reach the file.
    Ok(log_flusher)
}

fn configure_prod_tracing(app_name: &str, filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let file_appender = rolling::Builder::new()
        .filename_prefix(app_name)
        .filename_suffix("log")
        .rotation(rolling::Rotation::DAILY)
        .max_log_files(5)
        .build("logs")?;

    // Non-blocking writer so the job workers never stall on file I/O.
    let (file_appender, guard) = tracing_appender::non_blocking(file_appender);

    let format = fmt::format()
        .with_level(true)
        .with_ansi(false)
        .with_target(false);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_writer(file_appender)
        .json()
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;
    Ok(LogFlusher::Flusher(guard))
}

fn configure_dev_tracing(filter: EnvFilter) -> Result<LogFlusher, TracingError> {
    let format = fmt::format()
        .with_level(true)
        .with_ansi(true)
        .pretty()
        .with_line_number(false)
        .with_file(false)
        .with_target(false);

    let subscriber = FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .finish();

    set_global_default(subscriber)?;
    Ok(LogFlusher::NullFlusher)
}
