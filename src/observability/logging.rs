//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Select the log sink (`stdout`, `stderr`, or a file path)
//!
//! # Design Decisions
//! - JSON records, one per line, so the per-request line is machine readable
//! - Log level from `RUST_LOG`, defaulting to `info`

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Error type for logging setup.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log file {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("logger already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Destination for structured log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl LogOutput {
    /// Interpret a `--logout` value. Anything that is not a standard stream
    /// name is a file path.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "stdout" => LogOutput::Stdout,
            "stderr" => LogOutput::Stderr,
            path => LogOutput::File(PathBuf::from(path)),
        }
    }

    fn make_writer(&self) -> Result<BoxMakeWriter, LoggingError> {
        Ok(match self {
            LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogOutput::File(path) => {
                let file: File = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| LoggingError::Open {
                        path: path.clone(),
                        source,
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        })
    }
}

/// Install the global JSON subscriber writing to `output`.
pub fn init(output: &LogOutput) -> Result<(), LoggingError> {
    let writer = output.make_writer()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .with_span_list(false)
                .with_target(false)
                .with_writer(writer),
        )
        .try_init()?;

    Ok(())
}
