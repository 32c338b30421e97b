//! Error taxonomy for the loader.
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! type is [`LoaderError`]. The variants follow how a run reacts to them:
//!
//! - configuration and identifier problems abort before any target I/O
//! - connectivity and load-layer failures abort immediately
//! - layout, column and date problems abort the file (and so the run)
//! - rejected rows are captured to the error file, then abort the run
//! - resource exhaustion halts the run cleanly without promotion
//!
//! ```
//! use roamload::error::LoaderError;
//!
//! let err = LoaderError::InvalidIdentifier("1abc".to_owned());
//! assert_eq!(err.exit_code(), 1);
//! ```
//!
//! The `ResultExt` trait adds `.context()` to any `Result` whose error converts
//! into a [`LoaderError`]:
//!
//! ```no_run
//! use roamload::error::ResultExt as _;
//!
//! fn load_data() -> roamload::error::Result<Vec<u8>> {
//!     std::fs::read("usage.csv").context("Failed to read export")
//! }
//! ```

use std::fmt;
use std::path::PathBuf;

/// Main error type for loader operations.
#[derive(Debug)]
pub enum LoaderError {
    /// I/O errors (file reads, renames, error-file writes)
    Io(std::io::Error),

    /// Data frame errors raised by Polars
    DataProcessing(String),

    /// SQL execution failures against the warehouse
    Database(String),

    /// Could not open a session with the warehouse
    Connection(String),

    /// Missing or malformed configuration value
    Config(String),

    /// Table or schema name outside `^[A-Za-z][A-Za-z0-9_]{0,127}$`
    InvalidIdentifier(String),

    /// No known source layout matches the file headers
    NoMatchingLayout { file: String, detail: String },

    /// Columns required by the canonical schema are absent
    MissingColumns(Vec<String>),

    /// A value in a date column could not be parsed
    DateParse {
        column: String,
        row: usize,
        value: String,
    },

    /// Frame dtypes do not match the declared target column types
    SchemaMismatch(String),

    /// The target rejected rows during the bulk load
    LoadRejected {
        file: String,
        rejected: usize,
        error_file: PathBuf,
    },

    /// Memory could not be reserved for a file
    ResourceExhausted(String),

    /// Generic error with context
    Other(String),
}

impl LoaderError {
    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::ResourceExhausted(_) => 3,
            _ => 1,
        }
    }

    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::ResourceExhausted(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::OutOfMemory,
            _ => false,
        }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::DataProcessing(msg) => write!(f, "Data processing error: {msg}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::InvalidIdentifier(name) => write!(f, "Illegal table name detected: '{name}'"),
            Self::NoMatchingLayout { file, detail } => {
                write!(f, "No known layout matches {file}: {detail}")
            }
            Self::MissingColumns(cols) => {
                write!(f, "Missing canonical columns: {}", cols.join(", "))
            }
            Self::DateParse { column, row, value } => {
                write!(f, "Cannot parse '{value}' as a date in column {column} (row {row})")
            }
            Self::SchemaMismatch(msg) => write!(f, "Schema mismatch: {msg}"),
            Self::LoadRejected {
                file,
                rejected,
                error_file,
            } => write!(
                f,
                "{rejected} row(s) of {file} rejected by the target, sample written to {}",
                error_file.display()
            ),
            Self::ResourceExhausted(msg) => write!(f, "Out of memory: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::OutOfMemory {
            Self::ResourceExhausted(err.to_string())
        } else {
            Self::Io(err)
        }
    }
}

impl From<polars::error::PolarsError> for LoaderError {
    fn from(err: polars::error::PolarsError) -> Self {
        if let polars::error::PolarsError::IO { error, .. } = &err
            && error.kind() == std::io::ErrorKind::OutOfMemory
        {
            return Self::ResourceExhausted(err.to_string());
        }
        Self::DataProcessing(err.to_string())
    }
}

impl From<sqlx::Error> for LoaderError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(format!("JSON error: {err}"))
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<LoaderError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| wrap(e.into(), msg.into()))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

// Resource exhaustion keeps its variant so the run can still halt cleanly.
fn wrap(err: LoaderError, msg: String) -> LoaderError {
    match err {
        LoaderError::ResourceExhausted(inner) => {
            LoaderError::ResourceExhausted(format!("{msg}: {inner}"))
        }
        other => LoaderError::Other(format!("{msg}: {other}")),
    }
}
