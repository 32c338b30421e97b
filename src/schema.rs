//! Canonical 20-column layout shared by the staging and fact tables.

use crate::error::{LoaderError, Result};
use polars::prelude::*;
use std::fmt;

pub const PROCESSING_DATE: &str = "tap_file_current_processing_date";
pub const DATE_CALL: &str = "date_call";
pub const TADIG_CODE: &str = "pmn_settlement_tadig_code";
pub const CALL_TYPE: &str = "call_type";
pub const IMSI: &str = "imsi";
pub const MSISDN: &str = "msisdn";
pub const APN_NETWORK: &str = "apn_network";
pub const DEVICE_TAC_CODE: &str = "device_tac_code";
pub const NUMBER_OF_CALLS: &str = "number_of_calls";
pub const CHARGED_SMS: &str = "charged_sms";
pub const CHARGED_MINUTES: &str = "charged_minutes";
pub const CHARGED_MB: &str = "charged_mb";
pub const SETTLEMENT_GROSS_CHARGE: &str = "settlement_gross_charge_brl";
pub const DIRECTION: &str = "direction";
pub const SOURCE_FILE_NAME: &str = "source_file_name";
pub const SOURCE_SYSTEM: &str = "source_system";
pub const JOB_NAME: &str = "job_name";
pub const ETL_BATCH_ID: &str = "etl_batch_id";
pub const ROW_CREATE_TS: &str = "row_create_ts";
pub const ROW_CREATE_USER: &str = "row_create_user";

/// SQL type of a target column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Timestamp,
    /// Timestamp with microsecond precision
    Timestamp6,
    Varchar(u16),
    Char(u8),
    Integer,
    Numeric { precision: u8, scale: u8 },
}

impl SqlType {
    /// The dtype a frame column must hold before it is sent to this column.
    pub fn polars_dtype(self) -> DataType {
        match self {
            Self::Timestamp | Self::Timestamp6 => DataType::Datetime(TimeUnit::Microseconds, None),
            Self::Varchar(_) | Self::Char(_) => DataType::String,
            Self::Integer => DataType::Int64,
            Self::Numeric { .. } => DataType::Float64,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Timestamp6 => write!(f, "TIMESTAMP(6)"),
            Self::Varchar(len) => write!(f, "VARCHAR({len})"),
            Self::Char(len) => write!(f, "CHAR({len})"),
            Self::Integer => write!(f, "INTEGER"),
            Self::Numeric { precision, scale } => write!(f, "NUMERIC({precision},{scale})"),
        }
    }
}

/// One column of the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: SqlType,
    /// Server-side default, if any
    pub default: Option<&'static str>,
}

const fn column(name: &'static str, sql_type: SqlType) -> ColumnSpec {
    ColumnSpec {
        name,
        sql_type,
        default: None,
    }
}

const TEXT: SqlType = SqlType::Varchar(8000);
const AMOUNT: SqlType = SqlType::Numeric {
    precision: 15,
    scale: 5,
};

/// Staging order. Frames are reordered to this before every load.
pub const CANONICAL_COLUMNS: [ColumnSpec; 20] = [
    // loaded from the export
    column(PROCESSING_DATE, SqlType::Timestamp),
    column(DATE_CALL, SqlType::Timestamp),
    column(TADIG_CODE, TEXT),
    column(CALL_TYPE, TEXT),
    column(IMSI, TEXT),
    column(MSISDN, TEXT),
    column(APN_NETWORK, TEXT),
    column(DEVICE_TAC_CODE, TEXT),
    column(NUMBER_OF_CALLS, SqlType::Integer),
    column(CHARGED_SMS, SqlType::Integer),
    column(CHARGED_MINUTES, AMOUNT),
    column(CHARGED_MB, AMOUNT),
    column(SETTLEMENT_GROSS_CHARGE, AMOUNT),
    // filled by the loader
    column(DIRECTION, SqlType::Char(3)),
    column(SOURCE_FILE_NAME, SqlType::Varchar(255)),
    column(SOURCE_SYSTEM, SqlType::Varchar(255)),
    column(JOB_NAME, SqlType::Varchar(255)),
    column(ETL_BATCH_ID, SqlType::Varchar(50)),
    // defaulted by the server when absent
    ColumnSpec {
        name: ROW_CREATE_TS,
        sql_type: SqlType::Timestamp6,
        default: Some("CURRENT_TIMESTAMP"),
    },
    ColumnSpec {
        name: ROW_CREATE_USER,
        sql_type: SqlType::Varchar(128),
        default: Some("CURRENT_USER"),
    },
];

/// Column order of the fact table, used by promotion.
pub const FINAL_PROJECTION: [&str; 20] = [
    PROCESSING_DATE,
    DATE_CALL,
    DIRECTION,
    TADIG_CODE,
    CALL_TYPE,
    IMSI,
    MSISDN,
    DEVICE_TAC_CODE,
    APN_NETWORK,
    NUMBER_OF_CALLS,
    CHARGED_SMS,
    CHARGED_MINUTES,
    CHARGED_MB,
    SETTLEMENT_GROSS_CHARGE,
    SOURCE_FILE_NAME,
    SOURCE_SYSTEM,
    JOB_NAME,
    ETL_BATCH_ID,
    ROW_CREATE_TS,
    ROW_CREATE_USER,
];

pub fn canonical_names() -> impl Iterator<Item = &'static str> {
    CANONICAL_COLUMNS.iter().map(|c| c.name)
}

/// Column definitions for `CREATE TABLE`, one per line.
pub fn ddl_columns() -> String {
    CANONICAL_COLUMNS
        .iter()
        .map(|c| match c.default {
            Some(default) => format!("    {} {} DEFAULT {default}", c.name, c.sql_type),
            None => format!("    {} {}", c.name, c.sql_type),
        })
        .collect::<Vec<_>>()
        .join(",\n")
}

/// Selects the canonical columns in canonical order.
///
/// Extra columns are dropped. Fails with [`LoaderError::MissingColumns`]
/// listing every absent column.
pub fn reorder_to_canonical(df: &DataFrame) -> Result<DataFrame> {
    let present = df.get_column_names();
    let missing: Vec<String> = canonical_names()
        .filter(|name| !present.iter().any(|p| p.as_str() == *name))
        .map(ToOwned::to_owned)
        .collect();
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns(missing));
    }

    Ok(df.select(canonical_names())?)
}
