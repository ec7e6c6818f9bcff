//! Logging initialisation.
//!
//! Sets up `tracing` with:
//! - A daily rolling JSON file in the app data directory
//! - A human-readable console layer on stdout or stderr
//! - A bridge forwarding `log` records into `tracing`
//!
//! The filter is taken from `RUST_LOG` when set, otherwise from the
//! configured default.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor the configuration sets one.
pub const DEFAULT_FILTER: &str = "info";

const LOG_FILE_PREFIX: &str = "oauth-session.log";
const MAX_LOG_FILES: usize = 14;

/// Where human-readable output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStream {
    #[default]
    Stdout,
    /// Keeps stdout free for command output.
    Stderr,
}

/// Logging setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub console: ConsoleStream,
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub directory: PathBuf,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            console: ConsoleStream::Stdout,
            default_filter: DEFAULT_FILTER.to_string(),
            directory: default_log_dir(),
        }
    }
}

/// `<data dir>/oauth-session/logs`, or `./logs` without a data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("oauth-session").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Initialize logging with stdout output.
///
/// Returns a `WorkerGuard` which must be kept alive for the duration of the
/// application so buffered file logs are flushed on shutdown.
pub fn init() -> WorkerGuard {
    init_with(LogOptions::default())
}

/// Like [`init()`], with console output on stderr.
pub fn init_stderr() -> WorkerGuard {
    init_with(LogOptions {
        console: ConsoleStream::Stderr,
        ..LogOptions::default()
    })
}

/// Initialize logging from explicit options.
///
/// Failures (unwritable log directory, a subscriber already installed) are
/// reported on stderr and never abort the application.
pub fn init_with(options: LogOptions) -> WorkerGuard {
    if let Err(e) = fs::create_dir_all(&options.directory) {
        eprintln!(
            "Failed to create logs directory {}: {e}",
            options.directory.display()
        );
    }

    let (file_writer, guard) = match file_appender(&options) {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(e) => {
            eprintln!("File logging disabled: {e}");
            tracing_appender::non_blocking(io::sink())
        }
    };

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_filter(build_filter(&options.default_filter));

    let console_layer = match options.console {
        ConsoleStream::Stdout => tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_filter(build_filter(&options.default_filter))
            .boxed(),
        ConsoleStream::Stderr => tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_filter(build_filter(&options.default_filter))
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to initialize LogTracer: {e}");
    }

    log::info!(
        "Logging initialized. Writing to: {:?} (daily rolling)",
        options.directory.join(LOG_FILE_PREFIX)
    );

    guard
}

fn file_appender(
    options: &LogOptions,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(&options.directory)
}

/// `RUST_LOG` if set and valid, else `default`, else [`DEFAULT_FILTER`].
pub fn build_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
