//! Batched bulk load into the staging table.
//!
//! The frame is cut into `batch_size` slices which are handed to the
//! warehouse with at most `sessions` batches in flight. Rows the target
//! refuses are gathered into an error sub-table instead of failing the call;
//! whether that is fatal is the caller's decision.

use crate::config::IfExists;
use crate::error::{LoaderError, Result, ResultExt as _};
use crate::schema::ColumnSpec;
use crate::staging::prepare_staging;
use crate::warehouse::{BatchOutcome, TableRef, Warehouse};
use futures::{StreamExt as _, TryStreamExt as _};
use polars::prelude::*;
use std::path::Path;

pub const ERROR_CODE_COLUMN: &str = "error_code";
pub const ERROR_MESSAGE_COLUMN: &str = "error_message";

/// Rows copied into the error file.
pub const ERROR_SAMPLE_ROWS: usize = 2;

/// Where and how one frame is loaded.
#[derive(Debug, Clone)]
pub struct LoadRequest<'a> {
    pub target: &'a TableRef,
    pub column_types: &'a [ColumnSpec],
    pub if_exists: IfExists,
    pub batch_size: usize,
    pub sessions: usize,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub rows_submitted: usize,
    pub rows_accepted: u64,
    /// Rejected rows with `error_code` and `error_message` appended
    pub errors: DataFrame,
}

impl LoadOutcome {
    pub fn has_errors(&self) -> bool {
        self.errors.height() > 0
    }

    pub fn rejected(&self) -> usize {
        self.errors.height()
    }
}

/// Streams `df` into `request.target`.
///
/// Fails before sending anything when the frame does not match
/// `request.column_types`, and on any load-layer error. Rejected rows do not
/// fail the call; they come back in [`LoadOutcome::errors`].
pub async fn bulk_load<W>(
    warehouse: &W,
    df: &DataFrame,
    request: &LoadRequest<'_>,
) -> Result<LoadOutcome>
where
    W: Warehouse + ?Sized,
{
    check_column_types(df, request.column_types)?;
    prepare_staging(warehouse, request.target, request.if_exists).await?;

    let batch_size = request.batch_size.max(1);
    let batches: Vec<(usize, DataFrame)> = (0..df.height())
        .step_by(batch_size)
        .map(|offset| {
            let len = batch_size.min(df.height() - offset);
            (offset, df.slice(i64::try_from(offset).unwrap_or(i64::MAX), len))
        })
        .collect();
    tracing::debug!(
        "Sending {} row(s) to {} in {} batch(es) over {} session(s)",
        df.height(),
        request.target,
        batches.len(),
        request.sessions
    );

    let target = request.target;
    let mut results: Vec<(usize, DataFrame, BatchOutcome)> = futures::stream::iter(batches)
        .map(|(offset, batch)| async move {
            let outcome = warehouse
                .load_batch(target, &batch)
                .await
                .with_context(|| format!("Bulk load into {target} failed at row {offset}"))?;
            Ok::<_, LoaderError>((offset, batch, outcome))
        })
        .buffer_unordered(request.sessions.max(1))
        .try_collect()
        .await?;
    results.sort_by_key(|(offset, _, _)| *offset);

    let mut rows_accepted = 0;
    let mut errors: Option<DataFrame> = None;
    for (_, batch, outcome) in &results {
        rows_accepted += outcome.accepted;
        for rejection in &outcome.rejected {
            let mut row = batch.slice(i64::try_from(rejection.row).unwrap_or(i64::MAX), 1);
            row.with_column(Column::new(
                ERROR_CODE_COLUMN.into(),
                [rejection.code.as_str()],
            ))?;
            row.with_column(Column::new(
                ERROR_MESSAGE_COLUMN.into(),
                [rejection.message.as_str()],
            ))?;
            match errors.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&row)?;
                }
                None => errors = Some(row),
            }
        }
    }

    Ok(LoadOutcome {
        rows_submitted: df.height(),
        rows_accepted,
        errors: errors.unwrap_or_else(DataFrame::empty),
    })
}

/// Every declared column must be present with the dtype its SQL type needs,
/// in the declared order, with nothing else.
fn check_column_types(df: &DataFrame, column_types: &[ColumnSpec]) -> Result<()> {
    let actual: Vec<(String, DataType)> = df
        .get_columns()
        .iter()
        .map(|c| (c.name().to_string(), c.dtype().clone()))
        .collect();
    let expected: Vec<(String, DataType)> = column_types
        .iter()
        .map(|c| (c.name.to_owned(), c.sql_type.polars_dtype()))
        .collect();
    if actual == expected {
        return Ok(());
    }

    let mismatches: Vec<String> = expected
        .iter()
        .zip(actual.iter().map(Some).chain(std::iter::repeat(None)))
        .filter(|(want, got)| Some(*want) != *got)
        .map(|((name, dtype), got)| match got {
            Some((got_name, got_dtype)) => {
                format!("{name} {dtype} (found {got_name} {got_dtype})")
            }
            None => format!("{name} {dtype} (missing)"),
        })
        .collect();
    Err(LoaderError::SchemaMismatch(format!(
        "expected {} column(s), found {}: {}",
        expected.len(),
        actual.len(),
        mismatches.join(", ")
    )))
}

/// Writes the first [`ERROR_SAMPLE_ROWS`] rejected rows for triage:
/// `;`-separated with a header row, UTF-16 little endian with a BOM.
pub fn write_error_sample(errors: &DataFrame, path: &Path) -> Result<()> {
    let mut sample = errors.head(Some(ERROR_SAMPLE_ROWS));
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .with_separator(b';')
        .finish(&mut sample)?;
    let text = String::from_utf8(buf)
        .map_err(|e| LoaderError::Other(format!("Error sample is not UTF-8: {e}")))?;

    let mut bytes = Vec::with_capacity(2 + text.len() * 2);
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write error file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;

    const COLUMNS: [ColumnSpec; 2] = [
        ColumnSpec {
            name: "imsi",
            sql_type: SqlType::Varchar(8000),
            default: None,
        },
        ColumnSpec {
            name: "charged_sms",
            sql_type: SqlType::Integer,
            default: None,
        },
    ];

    fn frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new("imsi".into(), ["a", "b"]),
            Column::new("charged_sms".into(), [1_i64, 2]),
        ])
        .unwrap()
    }

    #[test]
    fn test_column_types_match() {
        check_column_types(&frame(), &COLUMNS).unwrap();
    }

    #[test]
    fn test_column_type_mismatch_is_reported() {
        let df = DataFrame::new(vec![
            Column::new("imsi".into(), ["a"]),
            Column::new("charged_sms".into(), ["1"]),
        ])
        .unwrap();
        let err = check_column_types(&df, &COLUMNS).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, LoaderError::SchemaMismatch(_)));
        assert!(msg.contains("charged_sms"), "{msg}");
    }

    #[test]
    fn test_missing_column_is_reported() {
        let df = frame().drop("charged_sms").unwrap();
        let msg = check_column_types(&df, &COLUMNS).unwrap_err().to_string();
        assert!(msg.contains("charged_sms i64 (missing)"), "{msg}");
    }

    #[test]
    fn test_error_sample_is_utf16_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.csv");
        let errors = DataFrame::new(vec![
            Column::new("imsi".into(), ["a", "b", "c"]),
            Column::new(ERROR_MESSAGE_COLUMN.into(), ["bad", "worse", "worst"]),
        ])
        .unwrap();

        write_error_sample(&errors, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xFE]);
        let (text, _, had_errors) = encoding_rs::UTF_16LE.decode(&bytes);
        assert!(!had_errors);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["imsi;error_message", "a;bad", "b;worse"]);
    }
}
