//! Drives one run: every export in a directory through the pipeline into
//! staging, then a single promotion.
//!
//! Files are processed strictly one after another, oldest first. A file is
//! moved to `processed/` only once its rows are all in staging; the first
//! failure stops the run and nothing is promoted. Rows a failed file already
//! put into staging are removed again, so the file can simply be rerun.

use crate::audit::AuditContext;
use crate::config::{IfExists, LoaderConfig};
use crate::error::{LoaderError, Result, ResultExt as _};
use crate::loader::{ERROR_SAMPLE_ROWS, LoadRequest, bulk_load, write_error_sample};
use crate::normalize::{normalize, processing_date_counts};
use crate::promotion::{PromotionReport, promote};
use crate::sanitize::{sanitize_dates, sanitize_numeric, sanitize_text};
use crate::schema::{self, CANONICAL_COLUMNS, reorder_to_canonical};
use crate::source::read_source_file;
use crate::staging::{discard_file_rows, ensure_staging_table};
use crate::warehouse::{TableRef, Warehouse};
use chrono::NaiveDateTime;
use polars::prelude::DataFrame;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

pub const PROCESSED_DIR: &str = "processed";

const DECIMAL_COLUMNS: [&str; 3] = [
    schema::CHARGED_MINUTES,
    schema::CHARGED_MB,
    schema::SETTLEMENT_GROSS_CHARGE,
];
const INTEGER_COLUMNS: [&str; 2] = [schema::CHARGED_SMS, schema::NUMBER_OF_CALLS];
const TEXT_COLUMNS: [&str; 6] = [
    schema::DEVICE_TAC_CODE,
    schema::IMSI,
    schema::MSISDN,
    schema::TADIG_CODE,
    schema::CALL_TYPE,
    schema::APN_NETWORK,
];
const DATE_COLUMNS: [&str; 2] = [schema::PROCESSING_DATE, schema::DATE_CALL];

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every file staged and promoted (possibly zero of them)
    Completed,
    /// A file or the load layer failed; nothing promoted
    Aborted,
    /// Memory ran out; staged files logged, nothing promoted
    Halted,
    /// Every file staged but the promotion failed; staging kept
    PromotionFailed,
}

impl RunStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Aborted => 1,
            Self::Halted => 3,
            Self::PromotionFailed => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub staging_table: String,
    pub final_table: String,
    pub etl_batch_id: String,
    /// Files whose rows reached staging, in load order
    pub files_staged: Vec<String>,
    pub rows_staged: u64,
    pub promotion: Option<PromotionReport>,
    pub error: Option<String>,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

/// One configured run against one warehouse.
pub struct Loader<'a, W: ?Sized> {
    config: &'a LoaderConfig,
    warehouse: &'a W,
    staging: TableRef,
    final_table: TableRef,
    audit: AuditContext,
}

impl<'a, W> Loader<'a, W>
where
    W: Warehouse + ?Sized,
{
    /// `now` fixes the batch id and the row creation timestamp for the run.
    pub fn new(config: &'a LoaderConfig, warehouse: &'a W, now: NaiveDateTime) -> Result<Self> {
        let staging = TableRef::new(&config.database, &config.staging_table)?;
        let final_table = TableRef::new(&config.database, &config.final_table)?;
        let audit = AuditContext::new(
            &config.direction,
            &config.source_system,
            &config.job_name,
            &config.job_name_abbr,
            &config.user,
            now,
        );
        Ok(Self {
            config,
            warehouse,
            staging,
            final_table,
            audit,
        })
    }

    pub fn staging_table(&self) -> &TableRef {
        &self.staging
    }

    /// Loads every `.csv` export in `input_dir`, then promotes.
    ///
    /// Never returns early with an error: the outcome, including the error
    /// that stopped the run, is in the summary.
    pub async fn run(&self, input_dir: &Path) -> RunSummary {
        let mut summary = RunSummary {
            status: RunStatus::Completed,
            staging_table: self.staging.to_string(),
            final_table: self.final_table.to_string(),
            etl_batch_id: self.audit.etl_batch_id.clone(),
            files_staged: Vec::new(),
            rows_staged: 0,
            promotion: None,
            error: None,
        };

        if let Err(e) = self.stage_all(input_dir, &mut summary).await {
            summary.status = if e.is_resource_exhaustion() {
                tracing::error!("Out of memory, stopping without promotion: {e}");
                RunStatus::Halted
            } else {
                tracing::error!("Run aborted: {e}");
                RunStatus::Aborted
            };
            tracing::warn!(
                "Files already in {}: [{}]",
                self.staging,
                summary.files_staged.join(", ")
            );
            summary.error = Some(e.to_string());
            return log_summary(summary);
        }

        match promote(self.warehouse, &self.staging, &self.final_table).await {
            Ok(report) => summary.promotion = Some(report),
            Err(e) => {
                summary.status = RunStatus::PromotionFailed;
                summary.error = Some(e.to_string());
            }
        }
        log_summary(summary)
    }

    async fn stage_all(&self, input_dir: &Path, summary: &mut RunSummary) -> Result<()> {
        let processed = input_dir.join(PROCESSED_DIR);
        ensure_dir(&processed)?;

        match ensure_staging_table(self.warehouse, self.staging.schema(), self.staging.name())
            .await
        {
            Ok(_) => {}
            Err(e @ LoaderError::InvalidIdentifier(_)) => return Err(e),
            Err(e) => tracing::error!("Could not create {}: {e}", self.staging),
        }

        let files = list_exports(input_dir)?;
        tracing::info!("{} file(s) to load from {}", files.len(), input_dir.display());

        for (index, path) in files.iter().enumerate() {
            // Only the first load of a run may clear or guard the table.
            let policy = if index == 0 {
                self.config.if_exists
            } else {
                IfExists::Append
            };
            let name = crate::audit::source_file_name(path);
            let started = Instant::now();

            let rows = self.stage_file(path, &name, policy).await?;

            let target = processed.join(&name);
            std::fs::rename(path, &target).with_context(|| {
                format!("Failed to move {} to {}", path.display(), target.display())
            })?;
            tracing::info!(
                "{name}: {rows} row(s) staged in {:.2}s, moved to {}",
                started.elapsed().as_secs_f64(),
                processed.display()
            );
            summary.files_staged.push(name);
            summary.rows_staged += rows;
        }
        Ok(())
    }

    async fn stage_file(&self, path: &Path, name: &str, policy: IfExists) -> Result<u64> {
        tracing::info!("Processing {name}");
        let raw = read_source_file(path, &self.config.source_format)?;
        for count in processing_date_counts(&raw) {
            tracing::info!(
                "{name}: {} call(s) with processing date {}",
                count.calls,
                count.processing_date
            );
        }

        let (df, layout) = normalize(raw, name)?;
        tracing::debug!("{name} read with the {} layout", layout.name);

        let df = sanitize_numeric(df, &DECIMAL_COLUMNS, false)?;
        let df = sanitize_numeric(df, &INTEGER_COLUMNS, true)?;
        let df = sanitize_text(df, &TEXT_COLUMNS)?;
        let df = sanitize_dates(df, &DATE_COLUMNS)?;
        let df = self.audit.enrich(df, path)?;
        let df = reorder_to_canonical(&df)?;

        let loaded = self.load_frame(name, &df, policy).await;
        if loaded.is_err() {
            // The file stays in place for a rerun; none of its rows may stay behind.
            if let Err(e) =
                discard_file_rows(self.warehouse, &self.staging, name, &self.audit.etl_batch_id)
                    .await
            {
                tracing::error!("Could not remove the rows of {name} from {}: {e}", self.staging);
            }
        }
        loaded
    }

    async fn load_frame(&self, name: &str, df: &DataFrame, policy: IfExists) -> Result<u64> {
        let request = LoadRequest {
            target: &self.staging,
            column_types: &CANONICAL_COLUMNS,
            if_exists: policy,
            batch_size: self.config.batch_size,
            sessions: self.config.load_sessions,
        };
        let outcome = bulk_load(self.warehouse, df, &request).await?;
        if outcome.has_errors() {
            tracing::error!(
                "{name}: {} of {} row(s) rejected by {}:\n{}",
                outcome.rejected(),
                outcome.rows_submitted,
                self.staging,
                outcome.errors.head(Some(ERROR_SAMPLE_ROWS))
            );
            write_error_sample(&outcome.errors, &self.config.errors_file)?;
            return Err(LoaderError::LoadRejected {
                file: name.to_owned(),
                rejected: outcome.rejected(),
                error_file: self.config.errors_file.clone(),
            });
        }
        Ok(outcome.rows_accepted)
    }
}

/// Creates `dir` unless it already exists.
fn ensure_dir(dir: &Path) -> Result<()> {
    match std::fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to create {}", dir.display())),
    }
}

/// Regular `.csv` files of `dir`, oldest modification time first.
pub fn list_exports(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !metadata.is_file() || !is_csv {
            tracing::debug!("Skipping {}", path.display());
            continue;
        }
        files.push((metadata.modified()?, path));
    }
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn log_summary(summary: RunSummary) -> RunSummary {
    match serde_json::to_string(&summary) {
        Ok(json) => tracing::info!("Run summary: {json}"),
        Err(e) => tracing::warn!("Could not serialize run summary: {e}"),
    }
    summary
}
