use super::{BatchOutcome, RowRejection, TableRef, Warehouse};
use crate::config::LoaderConfig;
use crate::error::{LoaderError, Result, ResultExt as _};
use crate::staging::QUERY_BAND;
use async_trait::async_trait;
use polars::prelude::*;
use secrecy::ExposeSecret as _;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};

/// SQLSTATE classes that mean "this row's data is bad": data exceptions (22)
/// and integrity constraint violations (23).
const REJECTION_CLASSES: [&str; 2] = ["22", "23"];

/// PostgreSQL backend. Batches travel through `COPY ... FROM STDIN`; one
/// pooled connection per load session.
pub struct PostgresWarehouse {
    pool: Pool<Postgres>,
}

/// Every pooled connection opens with the workload tag already set, so COPY
/// sessions carry it too.
fn connect_options(config: &LoaderConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .password(config.password.expose_secret())
        .database(&config.catalog)
        .application_name(QUERY_BAND)
}

/// Joins statements into one simple-query message. PostgreSQL runs such a
/// message as a single implicit transaction: an error in any statement rolls
/// back all of them.
fn atomic_script(statements: &[String]) -> String {
    statements
        .iter()
        .map(|sql| sql.trim().trim_end_matches(';'))
        .collect::<Vec<_>>()
        .join(";\n")
}

impl PostgresWarehouse {
    pub async fn connect(config: &LoaderConfig) -> Result<Self> {
        let options = connect_options(config);
        let pool = PgPoolOptions::new()
            .max_connections(u32::try_from(config.load_sessions).unwrap_or(u32::MAX))
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| {
                LoaderError::Connection(format!(
                    "Failed to connect to {}:{} (timeout after 10s): {e}",
                    config.host, config.port
                ))
            })?;
        Ok(Self { pool })
    }

    async fn copy_rows(
        &self,
        table: &TableRef,
        rows: &DataFrame,
    ) -> std::result::Result<u64, CopyError> {
        let columns = rows
            .get_column_names()
            .into_iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut buf = Vec::new();
        let mut chunk = rows.clone();
        CsvWriter::new(&mut buf)
            .include_header(false)
            .with_separator(b',')
            .with_null_value(String::new())
            .finish(&mut chunk)
            .map_err(|e| CopyError::Fatal(e.into()))?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| CopyError::Fatal(e.into()))?;
        let mut writer = conn
            .copy_in_raw(&format!(
                "COPY {table} ({columns}) FROM STDIN WITH (FORMAT csv, NULL '')"
            ))
            .await
            .map_err(CopyError::classify)?;
        writer.send(buf).await.map_err(CopyError::classify)?;
        writer.finish().await.map_err(CopyError::classify)
    }
}

enum CopyError {
    Rejected { code: String, message: String },
    Fatal(LoaderError),
}

impl CopyError {
    fn classify(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && let Some(code) = db.code()
            && REJECTION_CLASSES.iter().any(|class| code.starts_with(*class))
        {
            return Self::Rejected {
                code: code.into_owned(),
                message: db.message().to_owned(),
            };
        }
        Self::Fatal(err.into())
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let done = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn execute_atomic(&self, statements: &[String]) -> Result<()> {
        let script = atomic_script(statements);
        sqlx::raw_sql(&script)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Transaction rolled back:\n{script}"))?;
        Ok(())
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn load_batch(&self, table: &TableRef, batch: &DataFrame) -> Result<BatchOutcome> {
        match self.copy_rows(table, batch).await {
            Ok(rows) => return Ok(BatchOutcome::accepted(rows)),
            Err(CopyError::Fatal(e)) => return Err(e),
            Err(CopyError::Rejected { code, message }) => {
                tracing::warn!(
                    "Batch into {table} refused ({code}: {message}), isolating bad rows"
                );
            }
        }

        // The failed COPY rolled back as a whole; replay row by row.
        let mut outcome = BatchOutcome::accepted(0);
        for row in 0..batch.height() {
            let single = batch.slice(i64::try_from(row).unwrap_or(i64::MAX), 1);
            match self.copy_rows(table, &single).await {
                Ok(n) => outcome.accepted += n,
                Err(CopyError::Rejected { code, message }) => {
                    outcome.rejected.push(RowRejection { row, code, message });
                }
                Err(CopyError::Fatal(e)) => return Err(e),
            }
        }
        Ok(outcome)
    }
}
