//! Staging table provisioning.

use crate::config::IfExists;
use crate::error::{LoaderError, Result};
use crate::schema;
use crate::warehouse::{TableRef, Warehouse};
use regex::Regex;
use std::sync::LazyLock;

/// Workload tag set on the session before provisioning.
pub const QUERY_BAND: &str = "name=INT_ROAMING;";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,127}$").expect("identifier pattern compiles")
});

pub fn is_valid_table_name(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Guards every name that gets spliced into SQL text.
pub fn validate_identifier(name: &str) -> Result<()> {
    if is_valid_table_name(name) {
        Ok(())
    } else {
        Err(LoaderError::InvalidIdentifier(name.to_owned()))
    }
}

pub fn create_table_sql(table: &TableRef) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n{}\n)",
        schema::ddl_columns()
    )
}

/// Tags the session and creates the staging table if it is absent.
///
/// Names are validated before anything is sent; an invalid one fails with
/// [`LoaderError::InvalidIdentifier`] and issues no SQL.
pub async fn ensure_staging_table<W>(
    warehouse: &W,
    database: &str,
    name: &str,
) -> Result<TableRef>
where
    W: Warehouse + ?Sized,
{
    let table = TableRef::new(database, name)?;

    tracing::info!("Creating table {table} if it does not exist");
    warehouse
        .execute(&format!("SET application_name = '{QUERY_BAND}'"))
        .await?;
    warehouse.execute(&create_table_sql(&table)).await?;
    Ok(table)
}

/// Applies the `IF_EXISTS` policy to rows left over from earlier runs.
///
/// Called once per run, before the first file loads.
pub async fn prepare_staging<W>(warehouse: &W, table: &TableRef, policy: IfExists) -> Result<()>
where
    W: Warehouse + ?Sized,
{
    match policy {
        IfExists::Append => Ok(()),
        IfExists::Replace => {
            let removed = warehouse.execute(&format!("DELETE FROM {table}")).await?;
            if removed > 0 {
                tracing::warn!("Discarded {removed} leftover row(s) from {table}");
            }
            Ok(())
        }
        IfExists::Fail => {
            let leftover = warehouse.row_count(table).await?;
            if leftover == 0 {
                Ok(())
            } else {
                Err(LoaderError::Database(format!(
                    "{table} already holds {leftover} row(s) and IF_EXISTS is fail"
                )))
            }
        }
    }
}

/// Single-quoted SQL string literal.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn discard_file_sql(table: &TableRef, source_file: &str, etl_batch_id: &str) -> String {
    format!(
        "DELETE FROM {table} WHERE {} = {} AND {} = {}",
        schema::SOURCE_FILE_NAME,
        quote_literal(source_file),
        schema::ETL_BATCH_ID,
        quote_literal(etl_batch_id)
    )
}

/// Removes the rows one file put into staging during this run.
///
/// Used when a file's load fails part way, so the file can be loaded again
/// without its accepted rows being promoted twice.
pub async fn discard_file_rows<W>(
    warehouse: &W,
    table: &TableRef,
    source_file: &str,
    etl_batch_id: &str,
) -> Result<u64>
where
    W: Warehouse + ?Sized,
{
    let removed = warehouse
        .execute(&discard_file_sql(table, source_file, etl_batch_id))
        .await?;
    tracing::warn!("Removed {removed} row(s) of {source_file} from {table}");
    Ok(removed)
}
