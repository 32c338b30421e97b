//! Per-run logging.
//!
//! Each run writes to its own file, `log_{job}_{YYYYmmdd_HHMMSS}.log`, and to
//! the console with ANSI colors. The subscriber is installed as the scoped
//! default for the current thread and torn down when the [`RunLogger`] is
//! dropped, so nothing is registered process-wide.
//!
//! ```no_run
//! use roamload::logging::RunLogger;
//!
//! let logger = RunLogger::start("logs".as_ref(), "ROAMING_NAT")?;
//! tracing::info!("Writing to {}", logger.path().display());
//! # Ok::<(), roamload::error::LoaderError>(())
//! ```

use crate::error::{LoaderError, Result, ResultExt as _};
use std::path::{Path, PathBuf};
use tracing::subscriber::DefaultGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _};

pub const DEFAULT_LOG_DIR: &str = "logs";

/// Keeps the run's subscriber installed while alive.
pub struct RunLogger {
    path: PathBuf,
    _guard: DefaultGuard,
}

impl RunLogger {
    /// Creates `log_dir` if needed and starts logging into a new file there.
    ///
    /// `RUST_LOG` overrides the default `info` level.
    pub fn start(log_dir: &Path, job_name: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let prefix = log_file_prefix(job_name, chrono::Local::now().naive_local());
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(&prefix)
            .filename_suffix("log")
            .build(log_dir)
            .map_err(|e| LoaderError::Other(format!("Failed to create log file: {e}")))?;

        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|e| LoaderError::Config(format!("Invalid log filter: {e}")))?;

        let console_layer = fmt::layer().with_target(false).with_ansi(true);
        let file_layer = fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(appender);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer);
        let guard = tracing::subscriber::set_default(subscriber);

        let path = log_dir.join(format!("{prefix}.log"));
        tracing::info!("Logging to {}", path.display());
        Ok(Self {
            path,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `log_{job}_{YYYYmmdd_HHMMSS}`, with anything outside `[A-Za-z0-9_-]` in the
/// job name replaced by `_`.
fn log_file_prefix(job_name: &str, started: chrono::NaiveDateTime) -> String {
    let job: String = job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("log_{job}_{}", started.format("%Y%m%d_%H%M%S"))
}
