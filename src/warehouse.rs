//! The seam between the pipeline and the target database.
//!
//! The pipeline only issues plain SQL statements and hands over row batches;
//! how a batch travels (COPY, fastload, ...) is the backend's business.

pub mod postgres;

use crate::error::Result;
use crate::staging::validate_identifier;
use async_trait::async_trait;
use polars::prelude::DataFrame;
use std::fmt;

pub use postgres::PostgresWarehouse;

/// A schema-qualified table whose parts passed identifier validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    schema: String,
    name: String,
}

impl TableRef {
    pub fn new(schema: &str, name: &str) -> Result<Self> {
        validate_identifier(schema)?;
        validate_identifier(name)?;
        Ok(Self {
            schema: schema.to_owned(),
            name: name.to_owned(),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A row of a batch the target refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    /// Zero-based position within the batch
    pub row: usize,
    pub code: String,
    pub message: String,
}

/// What the target did with one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub accepted: u64,
    pub rejected: Vec<RowRejection>,
}

impl BatchOutcome {
    pub fn accepted(rows: u64) -> Self {
        Self {
            accepted: rows,
            rejected: Vec::new(),
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Executes one statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Executes statements in order inside one transaction.
    ///
    /// Either every statement takes effect or none does.
    async fn execute_atomic(&self, statements: &[String]) -> Result<()>;

    async fn row_count(&self, table: &TableRef) -> Result<u64>;

    /// Bulk-inserts a batch whose column names match the table's.
    ///
    /// Rows the target refuses for data reasons are reported in the outcome;
    /// an `Err` means the load layer itself failed.
    async fn load_batch(&self, table: &TableRef, batch: &DataFrame) -> Result<BatchOutcome>;
}
