//! Mapping the known export layouts onto the canonical source columns.
//!
//! Exports come in two header variants. Layouts are tried in order against
//! the headers actually present; the first one whose every source header
//! exists wins.

use crate::error::{LoaderError, Result};
use crate::schema;
use polars::prelude::*;
use serde::Serialize;

/// Header → canonical column mapping for one export variant.
#[derive(Debug)]
pub struct SourceLayout {
    pub name: &'static str,
    pub columns: [(&'static str, &'static str); 13],
}

pub const PROCESSING_DATE_HEADER: &str = "TAP File (Current) Processing Date";

pub const CALL_DETAIL_LAYOUT: SourceLayout = SourceLayout {
    name: "call-detail",
    columns: [
        (PROCESSING_DATE_HEADER, schema::PROCESSING_DATE),
        ("Date (Call) YYYYMMDD", schema::DATE_CALL),
        ("PMN (Settlement) TADIG Code", schema::TADIG_CODE),
        ("Call Type", schema::CALL_TYPE),
        ("IMSI", schema::IMSI),
        ("MSISDN", schema::MSISDN),
        ("Device TAC Code", schema::DEVICE_TAC_CODE),
        ("APN Network", schema::APN_NETWORK),
        (
            "Number of Calls (incl. combined partials)",
            schema::NUMBER_OF_CALLS,
        ),
        ("Charged SMS", schema::CHARGED_SMS),
        ("Charged Minutes", schema::CHARGED_MINUTES),
        ("Charged MB", schema::CHARGED_MB),
        (
            "Settlement Gross Charge - TAP Local Currency",
            schema::SETTLEMENT_GROSS_CHARGE,
        ),
    ],
};

pub const EVENT_SUMMARY_LAYOUT: SourceLayout = SourceLayout {
    name: "event-summary",
    columns: [
        (PROCESSING_DATE_HEADER, schema::PROCESSING_DATE),
        ("Date (Call)", schema::DATE_CALL),
        ("PMN (Settlement) TADIG Code", schema::TADIG_CODE),
        ("Call Type", schema::CALL_TYPE),
        ("IMSI", schema::IMSI),
        ("MSISDN", schema::MSISDN),
        ("Device TAC", schema::DEVICE_TAC_CODE),
        ("APN Network", schema::APN_NETWORK),
        ("Number of Events", schema::NUMBER_OF_CALLS),
        ("Charged Events", schema::CHARGED_SMS),
        ("Charged Minutes", schema::CHARGED_MINUTES),
        ("Charged MB", schema::CHARGED_MB),
        (
            "Settlement Gross Charge - TAP Local Currency",
            schema::SETTLEMENT_GROSS_CHARGE,
        ),
    ],
};

/// Candidate layouts, in the order they are tried.
pub static LAYOUTS: [&SourceLayout; 2] = [&CALL_DETAIL_LAYOUT, &EVENT_SUMMARY_LAYOUT];

impl SourceLayout {
    /// Source headers of this layout absent from `headers`.
    pub fn missing_headers(&self, headers: &[&str]) -> Vec<&'static str> {
        self.columns
            .iter()
            .map(|(source, _)| *source)
            .filter(|source| !headers.contains(source))
            .collect()
    }
}

/// Picks the first layout whose every source header is present.
pub fn select_layout(file: &str, headers: &[&str]) -> Result<&'static SourceLayout> {
    let mut misses = Vec::new();
    for layout in LAYOUTS {
        let missing = layout.missing_headers(headers);
        if missing.is_empty() {
            return Ok(layout);
        }
        misses.push(format!("{} lacks [{}]", layout.name, missing.join(", ")));
    }
    Err(LoaderError::NoMatchingLayout {
        file: file.to_owned(),
        detail: misses.join("; "),
    })
}

/// Projects a raw export onto the 13 canonical source columns.
pub fn normalize(raw: DataFrame, file: &str) -> Result<(DataFrame, &'static SourceLayout)> {
    let headers: Vec<&str> = raw
        .get_column_names()
        .into_iter()
        .map(|h| h.as_str())
        .collect();
    let layout = select_layout(file, &headers)?;

    let exprs: Vec<Expr> = layout
        .columns
        .iter()
        .map(|(source, canonical)| col(*source).alias(*canonical))
        .collect();
    let df = raw.lazy().select(exprs).collect()?;
    Ok((df, layout))
}

/// Call count for one processing-date value of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateCount {
    pub processing_date: String,
    /// Rows with a call date
    pub calls: u64,
}

/// Headers that carry the call date, in either layout.
const CALL_DATE_HEADERS: [&str; 2] = ["Date (Call)", "Date (Call) YYYYMMDD"];

/// Counts a raw export's non-null call dates per processing date, for
/// pre-load logging.
///
/// Never fails the run: a missing column or a bad frame is logged and yields
/// an empty list.
pub fn processing_date_counts(raw: &DataFrame) -> Vec<DateCount> {
    match try_processing_date_counts(raw) {
        Ok(counts) => counts,
        Err(e) => {
            tracing::error!("Column not found: {e}");
            Vec::new()
        }
    }
}

fn try_processing_date_counts(raw: &DataFrame) -> Result<Vec<DateCount>> {
    let call_date = CALL_DATE_HEADERS
        .into_iter()
        .find(|header| raw.column(header).is_ok())
        .ok_or_else(|| LoaderError::MissingColumns(vec![CALL_DATE_HEADERS[0].to_owned()]))?;

    let grouped = raw
        .clone()
        .lazy()
        .group_by([col(PROCESSING_DATE_HEADER)])
        .agg([col(call_date).count().cast(DataType::UInt64).alias("calls")])
        .sort([PROCESSING_DATE_HEADER], SortMultipleOptions::default())
        .collect()?;

    let dates = grouped
        .column(PROCESSING_DATE_HEADER)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let calls = grouped.column("calls")?.as_materialized_series().clone();
    let dates = dates.str()?;
    let calls = calls.u64()?;

    Ok(dates
        .into_iter()
        .zip(calls)
        .map(|(date, count)| DateCount {
            processing_date: date.unwrap_or("NA").to_owned(),
            calls: count.unwrap_or(0),
        })
        .collect())
}
