//! Shared fixtures: an in-memory warehouse and UTF-16 export writers.

use async_trait::async_trait;
use polars::prelude::{BooleanChunked, DataFrame, StringChunked};
use roamload::config::LoaderConfig;
use roamload::error::{LoaderError, Result};
use roamload::normalize::SourceLayout;
use roamload::warehouse::{BatchOutcome, RowRejection, TableRef, Warehouse};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Provenance of one staged row: source file and batch id.
type RowTag = (String, String);

#[derive(Debug, Default, Clone)]
struct State {
    statements: Vec<String>,
    /// Rows per existing table
    tables: HashMap<String, Vec<RowTag>>,
    /// Every accepted batch, in arrival order
    loaded: Vec<DataFrame>,
    load_calls: usize,
}

/// Understands just enough SQL to follow a run: `SET`, `CREATE TABLE IF NOT
/// EXISTS`, `DELETE FROM` (optionally filtered on source file and batch id),
/// `INSERT INTO ... SELECT ... FROM` and `DROP TABLE`.
#[derive(Debug, Default)]
pub struct FakeWarehouse {
    state: Mutex<State>,
    rejected_imsis: Mutex<HashSet<String>>,
    fail_atomic: Mutex<bool>,
    exhaust_after: Mutex<Option<usize>>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows with this IMSI are refused with SQLSTATE 22P02.
    pub fn reject_imsi(&self, imsi: &str) {
        self.rejected_imsis.lock().unwrap().insert(imsi.to_owned());
    }

    pub fn accept_all(&self) {
        self.rejected_imsis.lock().unwrap().clear();
    }

    /// Makes every transaction fail.
    pub fn fail_promotion(&self) {
        *self.fail_atomic.lock().unwrap() = true;
    }

    /// Lets `batches` batch loads through, then runs out of memory.
    pub fn exhaust_after(&self, batches: usize) {
        *self.exhaust_after.lock().unwrap() = Some(batches);
    }

    /// Creates `table` holding `rows` rows left over from an earlier run.
    pub fn create_table(&self, table: &str, rows: usize) {
        let leftover = vec![("leftover.csv".to_owned(), "01012026_OLD".to_owned()); rows];
        self.state.lock().unwrap().tables.insert(table.to_owned(), leftover);
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    /// `None` when the table does not exist.
    pub fn rows_in(&self, table: &str) -> Option<u64> {
        let state = self.state.lock().unwrap();
        state.tables.get(table).map(|rows| rows.len() as u64)
    }

    pub fn loaded(&self) -> Vec<DataFrame> {
        self.state.lock().unwrap().loaded.clone()
    }
}

fn table_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = &sql[sql.rfind(keyword)? + keyword.len()..];
    rest.split(|c: char| c.is_whitespace() || c == '(').next()
}

/// The single-quoted literal following `keyword`, with `''` unescaped.
fn literal_after(sql: &str, keyword: &str) -> Option<String> {
    let rest = sql[sql.find(keyword)? + keyword.len()..].strip_prefix('\'')?;
    let mut value = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
            } else {
                return Some(value);
            }
        }
        value.push(c);
    }
    None
}

fn apply(state: &mut State, sql: &str) -> Result<u64> {
    state.statements.push(sql.to_owned());
    let missing = |table: &str| LoaderError::Database(format!("relation {table} does not exist"));

    if sql.starts_with("SET ") {
        Ok(0)
    } else if sql.starts_with("CREATE TABLE IF NOT EXISTS ") {
        let table = table_after(sql, "CREATE TABLE IF NOT EXISTS ").unwrap_or_default();
        state.tables.entry(table.to_owned()).or_default();
        Ok(0)
    } else if sql.starts_with("DELETE FROM ") {
        let table = table_after(sql, "DELETE FROM ").unwrap_or_default();
        let rows = state.tables.get_mut(table).ok_or_else(|| missing(table))?;
        let before = rows.len();
        match (
            literal_after(sql, "source_file_name = "),
            literal_after(sql, "etl_batch_id = "),
        ) {
            (Some(file), Some(batch)) => rows.retain(|(f, b)| *f != file || *b != batch),
            _ => rows.clear(),
        }
        Ok((before - rows.len()) as u64)
    } else if sql.starts_with("INSERT INTO ") {
        let target = table_after(sql, "INSERT INTO ").unwrap_or_default().to_owned();
        let source = table_after(sql, "FROM ").unwrap_or_default();
        let rows = state.tables.get(source).ok_or_else(|| missing(source))?.clone();
        let inserted = rows.len() as u64;
        state.tables.entry(target).or_default().extend(rows);
        Ok(inserted)
    } else if sql.starts_with("DROP TABLE ") {
        let table = table_after(sql, "DROP TABLE ").unwrap_or_default();
        state.tables.remove(table).ok_or_else(|| missing(table))?;
        Ok(0)
    } else {
        Err(LoaderError::Database(format!("unsupported statement: {sql}")))
    }
}

fn text_column<'a>(batch: &'a DataFrame, name: &str) -> &'a StringChunked {
    batch
        .column(name)
        .unwrap()
        .as_materialized_series()
        .str()
        .unwrap()
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64> {
        apply(&mut self.state.lock().unwrap(), sql)
    }

    async fn execute_atomic(&self, statements: &[String]) -> Result<()> {
        if *self.fail_atomic.lock().unwrap() {
            return Err(LoaderError::Database("deadlock detected".to_owned()));
        }
        let mut state = self.state.lock().unwrap();
        let mut tx = state.clone();
        for sql in statements {
            apply(&mut tx, sql)?;
        }
        *state = tx;
        Ok(())
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        self.rows_in(&table.to_string())
            .ok_or_else(|| LoaderError::Database(format!("relation {table} does not exist")))
    }

    async fn load_batch(&self, table: &TableRef, batch: &DataFrame) -> Result<BatchOutcome> {
        let mut state = self.state.lock().unwrap();
        state.load_calls += 1;
        if let Some(limit) = *self.exhaust_after.lock().unwrap()
            && state.load_calls > limit
        {
            return Err(LoaderError::ResourceExhausted(
                "could not allocate COPY buffer".to_owned(),
            ));
        }

        let rejected_imsis = self.rejected_imsis.lock().unwrap().clone();
        let imsis = text_column(batch, "imsi");
        let files = text_column(batch, "source_file_name");
        let batch_ids = text_column(batch, "etl_batch_id");

        let mut outcome = BatchOutcome::accepted(0);
        let mut keep = Vec::with_capacity(batch.height());
        let mut tags = Vec::new();
        for row in 0..batch.height() {
            let imsi = imsis.get(row).unwrap_or_default();
            let refused = rejected_imsis.contains(imsi);
            keep.push(!refused);
            if refused {
                outcome.rejected.push(RowRejection {
                    row,
                    code: "22P02".to_owned(),
                    message: format!("invalid input for imsi: {imsi}"),
                });
            } else {
                outcome.accepted += 1;
                tags.push((
                    files.get(row).unwrap_or_default().to_owned(),
                    batch_ids.get(row).unwrap_or_default().to_owned(),
                ));
            }
        }

        state
            .tables
            .get_mut(&table.to_string())
            .ok_or_else(|| LoaderError::Database(format!("relation {table} does not exist")))?
            .extend(tags);
        let mask = BooleanChunked::from_iter(keep.into_iter().map(Some));
        state.loaded.push(batch.filter(&mask)?);
        Ok(outcome)
    }
}

/// Writes an export the way the source system does: UTF-16LE with a BOM,
/// `;`-separated, header first. `age` pushes the modification time back so
/// files sort in a known order.
pub fn write_export(
    dir: &Path,
    name: &str,
    layout: &SourceLayout,
    rows: &[[&str; 13]],
    age: u64,
) -> PathBuf {
    let mut lines = vec![
        layout
            .columns
            .iter()
            .map(|(header, _)| *header)
            .collect::<Vec<_>>()
            .join(";"),
    ];
    lines.extend(rows.iter().map(|row| row.join(";")));
    write_utf16(dir, name, &lines.join("\n"), age)
}

pub fn write_utf16(dir: &Path, name: &str, text: &str, age: u64) -> PathBuf {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(age))
        .unwrap();
    path
}

/// A valid configuration with every setting given; `overrides` replaces or
/// adds entries.
pub fn config(errors_file: &Path, overrides: &[(&str, &str)]) -> Result<LoaderConfig> {
    let mut env: HashMap<String, String> = [
        ("DIRECTION", "IN"),
        ("SOURCE_SYSTEM", "DCH"),
        ("JOB_NAME", "ROAMING_NACIONAL"),
        ("JOB_NAME_ABBR", "RMNAT"),
        ("TERADATA_HOST", "localhost"),
        ("TERADATA_USER", "svc_loader"),
        ("TERADATA_PASSWORD", "secret"),
        ("TERADATA_DB", "U_INT_ATACADO"),
        ("TABLE_NAME", "STG_RMNG_NAT_"),
        ("IF_EXISTS", "append"),
        ("BATCH_SIZE_TERADATA", "2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    env.insert("ERRORS_FILE".to_owned(), errors_file.to_string_lossy().into_owned());
    for (key, value) in overrides {
        env.insert((*key).to_owned(), (*value).to_owned());
    }
    LoaderConfig::from_lookup(|key| env.get(key).cloned())
}

pub const STAGING: &str = "U_INT_ATACADO.STG_RMNG_NAT_IN";
pub const FINAL: &str = "U_INT_ATACADO.FCT_RMNG_NAT";
