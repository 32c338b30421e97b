//! Provenance columns appended to every loaded row.

use crate::error::Result;
use crate::schema;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::path::Path;

/// Audit values fixed for one run.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub direction: String,
    pub source_system: String,
    pub job_name: String,
    pub etl_batch_id: String,
    pub row_create_user: String,
    pub row_create_ts: NaiveDateTime,
}

impl AuditContext {
    pub fn new(
        direction: &str,
        source_system: &str,
        job_name: &str,
        job_name_abbr: &str,
        db_user: &str,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            direction: direction.to_owned(),
            source_system: source_system.to_owned(),
            job_name: job_name.to_owned(),
            etl_batch_id: batch_id(now.date(), job_name_abbr),
            row_create_user: capitalize(db_user),
            row_create_ts: now,
        }
    }

    /// Appends the seven audit columns, leaving existing ones untouched.
    pub fn enrich(&self, df: DataFrame, source: &Path) -> Result<DataFrame> {
        let created = self.row_create_ts.and_utc().timestamp_micros();
        let df = df
            .lazy()
            .with_columns([
                lit(self.direction.as_str()).alias(schema::DIRECTION),
                lit(source_file_name(source)).alias(schema::SOURCE_FILE_NAME),
                lit(self.source_system.as_str()).alias(schema::SOURCE_SYSTEM),
                lit(self.job_name.as_str()).alias(schema::JOB_NAME),
                lit(self.etl_batch_id.as_str()).alias(schema::ETL_BATCH_ID),
                lit(created)
                    .cast(DataType::Datetime(TimeUnit::Microseconds, None))
                    .alias(schema::ROW_CREATE_TS),
                lit(self.row_create_user.as_str()).alias(schema::ROW_CREATE_USER),
            ])
            .collect()?;
        Ok(df)
    }
}

/// `ddmmyyyy_abbr`, e.g. `17102026_RMNGNAT`.
pub fn batch_id(date: NaiveDate, job_name_abbr: &str) -> String {
    format!("{}_{job_name_abbr}", date.format("%d%m%Y"))
}

/// Base name of a path, split on both `/` and `\`.
pub fn source_file_name(path: &Path) -> String {
    let full = path.to_string_lossy();
    full.rsplit(['/', '\\']).next().unwrap_or_default().to_owned()
}

/// First character upper case, the rest lower case.
fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
