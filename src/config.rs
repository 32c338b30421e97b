//! Run configuration, read once from the environment and validated eagerly.

use crate::error::{LoaderError, Result};
use crate::source::SourceFormat;
use crate::staging::validate_identifier;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_FINAL_TABLE: &str = "FCT_RMNG_NAT";
pub const DEFAULT_LOAD_SESSIONS: usize = 2;
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_ERRORS_FILE: &str = "errors.csv";

/// What to do with rows already sitting in the staging table when a run
/// starts loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Keep them; they are promoted with this run's rows
    Append,
    /// Delete them before the first file loads
    Replace,
    /// Abort the run if there are any
    Fail,
}

impl FromStr for IfExists {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "fail" => Ok(Self::Fail),
            other => Err(LoaderError::Config(format!(
                "IF_EXISTS must be append, replace or fail, got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for IfExists {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => write!(f, "append"),
            Self::Replace => write!(f, "replace"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Validated settings for one loader run.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub direction: String,
    pub source_system: String,
    pub job_name: String,
    pub job_name_abbr: String,

    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Schema that qualifies the staging and fact tables
    pub database: String,
    /// Database the connection opens
    pub catalog: String,

    /// `TABLE_NAME` + `DIRECTION`
    pub staging_table: String,
    pub final_table: String,
    pub if_exists: IfExists,
    pub batch_size: usize,
    pub load_sessions: usize,

    pub source_format: SourceFormat,
    pub errors_file: PathBuf,
}

impl LoaderConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            optional(key).ok_or_else(|| LoaderError::Config(format!("{key} is not set")))
        };

        let direction = required("DIRECTION")?.trim().to_owned();
        if direction.chars().count() > 3 {
            return Err(LoaderError::Config(format!(
                "DIRECTION must be at most 3 characters, got '{direction}'"
            )));
        }

        let staging_table = format!("{}{direction}", required("TABLE_NAME")?.trim());
        validate_identifier(&staging_table)?;

        let final_table = optional("FINAL_TABLE_NAME")
            .unwrap_or_else(|| DEFAULT_FINAL_TABLE.to_owned());
        validate_identifier(&final_table)?;

        let database = required("TERADATA_DB")?.trim().to_owned();
        validate_identifier(&database)?;

        let batch_size = parse_positive("BATCH_SIZE_TERADATA", &required("BATCH_SIZE_TERADATA")?)?;
        let load_sessions = match optional("LOAD_SESSIONS") {
            Some(raw) => parse_positive("LOAD_SESSIONS", &raw)?,
            None => DEFAULT_LOAD_SESSIONS,
        };
        let port = match optional("TERADATA_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| {
                LoaderError::Config(format!("TERADATA_PORT is not a valid port '{raw}': {e}"))
            })?,
            None => DEFAULT_PORT,
        };
        let source_format = match optional("SOURCE_ENCODING") {
            Some(label) => SourceFormat::with_encoding_label(&label)?,
            None => SourceFormat::default(),
        };

        Ok(Self {
            direction,
            source_system: required("SOURCE_SYSTEM")?,
            job_name: required("JOB_NAME")?,
            job_name_abbr: required("JOB_NAME_ABBR")?,
            host: required("TERADATA_HOST")?,
            port,
            user: required("TERADATA_USER")?,
            password: SecretString::new(required("TERADATA_PASSWORD")?.into()),
            catalog: optional("TARGET_CATALOG").unwrap_or_else(|| database.clone()),
            database,
            staging_table,
            final_table,
            if_exists: required("IF_EXISTS")?.parse()?,
            batch_size,
            load_sessions,
            source_format,
            errors_file: optional("ERRORS_FILE")
                .map_or_else(|| PathBuf::from(DEFAULT_ERRORS_FILE), PathBuf::from),
        })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(LoaderError::Config(format!("{key} must be greater than zero"))),
        Ok(value) => Ok(value),
        Err(_) => Err(LoaderError::Config(format!(
            "{key} is not a valid integer: '{raw}'"
        ))),
    }
}
