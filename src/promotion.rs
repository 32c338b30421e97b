//! Moving staged rows into the fact table.

use crate::error::Result;
use crate::schema::FINAL_PROJECTION;
use crate::warehouse::{TableRef, Warehouse};
use serde::Serialize;

/// Rows moved by a successful promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub rows: u64,
}

pub fn insert_select_sql(final_table: &TableRef, staging: &TableRef) -> String {
    let columns = FINAL_PROJECTION.join(",\n    ");
    format!(
        "INSERT INTO {final_table} (\n    {columns}\n)\nSELECT\n    {columns}\nFROM {staging}"
    )
}

pub fn drop_table_sql(table: &TableRef) -> String {
    format!("DROP TABLE {table}")
}

/// Copies every staged row into `final_table`, then drops `staging`, in one
/// transaction.
///
/// On failure nothing is dropped: the staging table stays behind with its rows
/// for inspection or a retry.
pub async fn promote<W>(
    warehouse: &W,
    staging: &TableRef,
    final_table: &TableRef,
) -> Result<PromotionReport>
where
    W: Warehouse + ?Sized,
{
    tracing::info!("Sending staged data to {final_table}...");
    let rows = warehouse.row_count(staging).await?;

    let statements = [
        insert_select_sql(final_table, staging),
        drop_table_sql(staging),
    ];
    match warehouse.execute_atomic(&statements).await {
        Ok(()) => {
            tracing::info!("{rows} row(s) promoted to {final_table}, {staging} dropped");
            Ok(PromotionReport { rows })
        }
        Err(e) => {
            tracing::error!("Failed to move data out of staging, {staging} kept: {e}");
            Err(e)
        }
    }
}
