//! Column sanitization passes.
//!
//! Each pass is idempotent and skips columns the frame does not have.

use crate::error::{LoaderError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use regex::Regex;
use std::sync::LazyLock;

/// Value substituted for missing text cells.
pub const MISSING_TEXT: &str = "NA";

/// Decimal places kept by the non-integer numeric pass.
pub const DECIMAL_PLACES: u32 = 5;

// Tried in order against the first non-null value of a column.
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y%m%d%H%M%S",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y%m%d", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d"];

fn present<'a>(df: &DataFrame, columns: &[&'a str]) -> Vec<&'a str> {
    columns
        .iter()
        .copied()
        .filter(|name| df.column(name).is_ok())
        .collect()
}

/// Coerces locale-formatted numbers (`1.234,50`) to numeric columns.
///
/// Unparseable and missing values become 0. With `integer` the values are
/// truncated to Int64, otherwise they stay Float64 rounded to
/// [`DECIMAL_PLACES`]. Columns that already hold numbers skip the text stage.
pub fn sanitize_numeric(mut df: DataFrame, columns: &[&str], integer: bool) -> Result<DataFrame> {
    let targets = present(&df, columns);
    if targets.is_empty() {
        return Ok(df);
    }

    let mut exprs = Vec::with_capacity(targets.len());
    for name in targets {
        let column = df.column(name)?.as_materialized_series();
        if !column.dtype().is_primitive_numeric() {
            let text = column.cast(&DataType::String)?;
            let parsed: Float64Chunked = text
                .str()?
                .into_iter()
                .map(|v| v.and_then(parse_locale_number))
                .collect();
            df.with_column(parsed.with_name(name.into()).into_series())?;
        }

        let expr = col(name).cast(DataType::Float64).fill_null(lit(0.0));
        let expr = if integer {
            expr.cast(DataType::Int64).fill_null(lit(0i64))
        } else {
            expr.round(DECIMAL_PLACES)
        };
        exprs.push(expr.alias(name));
    }

    Ok(df.lazy().with_columns(exprs).collect()?)
}

// `1.234.567` with no decimal comma: the dots group thousands.
static THOUSANDS_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?\d{1,3}(\.\d{3})+$").expect("thousands pattern compiles")
});

/// Reads `1.234,50`, `12,5`, `1.000` and plain `1234.50`.
///
/// A `.` is a thousands separator when the value also has a decimal comma or
/// is nothing but dot-grouped digits; otherwise it is the decimal point.
fn parse_locale_number(raw: &str) -> Option<f64> {
    let value = raw.trim();
    let normalized = if value.contains(',') {
        value.replace('.', "").replace(',', ".")
    } else if THOUSANDS_ONLY.is_match(value) {
        value.replace('.', "")
    } else {
        value.to_owned()
    };
    normalized.parse().ok()
}

/// Forces columns to text, replacing nulls with [`MISSING_TEXT`].
pub fn sanitize_text(df: DataFrame, columns: &[&str]) -> Result<DataFrame> {
    let exprs: Vec<Expr> = present(&df, columns)
        .into_iter()
        .map(|name| {
            col(name)
                .cast(DataType::String)
                .fill_null(lit(MISSING_TEXT))
                .alias(name)
        })
        .collect();
    if exprs.is_empty() {
        return Ok(df);
    }

    Ok(df.lazy().with_columns(exprs).collect()?)
}

/// Parses columns into microsecond timestamps.
///
/// The format is inferred from the first non-null value and then required of
/// every value in the column; a value that does not fit is a
/// [`LoaderError::DateParse`]. Nulls stay null. Timestamp columns are left as
/// they are.
pub fn sanitize_dates(mut df: DataFrame, columns: &[&str]) -> Result<DataFrame> {
    for name in present(&df, columns) {
        let column = df.column(name)?.as_materialized_series();
        if matches!(column.dtype(), DataType::Datetime(_, _)) {
            continue;
        }

        let text = column.cast(&DataType::String)?;
        let values = text.str()?;
        let format = values
            .into_iter()
            .flatten()
            .find_map(|v| infer_format(v.trim()));

        let mut micros = Vec::with_capacity(values.len());
        for (row, value) in values.into_iter().enumerate() {
            let parsed = match value {
                None => None,
                Some(raw) => {
                    let ts = format
                        .and_then(|f| parse_with(raw.trim(), f))
                        .ok_or_else(|| LoaderError::DateParse {
                            column: name.to_owned(),
                            row,
                            value: raw.to_owned(),
                        })?;
                    Some(ts.and_utc().timestamp_micros())
                }
            };
            micros.push(parsed);
        }

        let parsed = Series::new(name.into(), micros)
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;
        df.with_column(parsed)?;
    }
    Ok(df)
}

#[derive(Debug, Clone, Copy)]
enum DateFormat {
    DateTime(&'static str),
    Date(&'static str),
}

fn infer_format(value: &str) -> Option<DateFormat> {
    DATETIME_FORMATS
        .into_iter()
        .map(DateFormat::DateTime)
        .chain(DATE_FORMATS.into_iter().map(DateFormat::Date))
        .find(|f| parse_with(value, *f).is_some())
}

fn parse_with(value: &str, format: DateFormat) -> Option<NaiveDateTime> {
    match format {
        DateFormat::DateTime(f) => NaiveDateTime::parse_from_str(value, f).ok(),
        DateFormat::Date(f) => NaiveDate::parse_from_str(value, f)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_frame(name: &str, values: &[Option<&str>]) -> DataFrame {
        DataFrame::new(vec![Column::new(name.into(), values.to_vec())]).unwrap()
    }

    fn f64_values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_numeric_locale_format() {
        let df = text_frame("amount", &[Some("1.234,50"), Some("0,123456"), Some("7")]);
        let df = sanitize_numeric(df, &["amount"], false).unwrap();
        assert_eq!(
            f64_values(&df, "amount"),
            vec![Some(1234.5), Some(0.12346), Some(7.0)]
        );
    }

    #[test]
    fn test_numeric_is_idempotent() {
        let df = text_frame("amount", &[Some("1.234,50"), Some("12,5"), None]);
        let once = sanitize_numeric(df, &["amount"], false).unwrap();
        let twice = sanitize_numeric(once.clone(), &["amount"], false).unwrap();
        assert_eq!(f64_values(&once, "amount"), vec![Some(1234.5), Some(12.5), Some(0.0)]);
        assert!(once.equals_missing(&twice));

        let ints = sanitize_numeric(text_frame("n", &[Some("1.000")]), &["n"], true).unwrap();
        let again = sanitize_numeric(ints.clone(), &["n"], true).unwrap();
        assert!(ints.equals_missing(&again));
    }

    #[test]
    fn test_numeric_accepts_decimal_point() {
        let df = text_frame("amount", &[Some("1234.50"), Some("1.000"), Some("-1.234.567")]);
        let once = sanitize_numeric(df, &["amount"], false).unwrap();
        assert_eq!(
            f64_values(&once, "amount"),
            vec![Some(1234.5), Some(1000.0), Some(-1_234_567.0)]
        );

        // Re-reading the sanitized values as text must not shift the decimal point.
        let as_text = once
            .lazy()
            .with_column(col("amount").cast(DataType::String))
            .collect()
            .unwrap();
        let again = sanitize_numeric(as_text, &["amount"], false).unwrap();
        assert_eq!(f64_values(&again, "amount")[0], Some(1234.5));
    }

    #[test]
    fn test_parse_locale_number() {
        assert_eq!(parse_locale_number("1.234,50"), Some(1234.5));
        assert_eq!(parse_locale_number(" 12,5 "), Some(12.5));
        assert_eq!(parse_locale_number("1234.50"), Some(1234.5));
        assert_eq!(parse_locale_number("12.345"), Some(12345.0));
        assert_eq!(parse_locale_number("abc"), None);
        assert_eq!(parse_locale_number(""), None);
    }

    #[test]
    fn test_integer_flag_truncates() {
        let df = text_frame("calls", &[Some("10,7"), Some("3"), Some("-2,9")]);
        let df = sanitize_numeric(df, &["calls"], true).unwrap();
        let calls = df.column("calls").unwrap().as_materialized_series();
        assert_eq!(calls.dtype(), &DataType::Int64);
        let got: Vec<Option<i64>> = calls.i64().unwrap().into_iter().collect();
        assert_eq!(got, vec![Some(10), Some(3), Some(-2)]);
    }

    #[test]
    fn test_unparseable_becomes_zero() {
        let df = text_frame("mb", &[Some("abc"), None, Some("")]);
        let df = sanitize_numeric(df, &["mb"], false).unwrap();
        assert_eq!(f64_values(&df, "mb"), vec![Some(0.0), Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_absent_columns_are_skipped() {
        let df = text_frame("imsi", &[Some("1")]);
        let out = sanitize_numeric(df.clone(), &["charged_mb"], false).unwrap();
        assert!(out.equals_missing(&df));
        let out = sanitize_text(df.clone(), &["msisdn"]).unwrap();
        assert!(out.equals_missing(&df));
        let out = sanitize_dates(df.clone(), &["date_call"]).unwrap();
        assert!(out.equals_missing(&df));
    }

    #[test]
    fn test_text_never_leaves_nulls() {
        let df = text_frame("msisdn", &[Some("5511"), None]);
        let df = sanitize_text(df, &["msisdn"]).unwrap();
        let col = df.column("msisdn").unwrap().as_materialized_series();
        assert_eq!(col.null_count(), 0);
        assert_eq!(col.str().unwrap().get(1), Some(MISSING_TEXT));
    }

    #[test]
    fn test_text_casts_numbers() {
        let df = DataFrame::new(vec![Column::new("tac".into(), [Some(35_123_i64), None])]).unwrap();
        let df = sanitize_text(df, &["tac"]).unwrap();
        let col = df.column("tac").unwrap().as_materialized_series();
        assert_eq!(col.str().unwrap().get(0), Some("35123"));
        assert_eq!(col.str().unwrap().get(1), Some("NA"));
    }

    #[test]
    fn test_dates_infer_format() {
        let df = text_frame("date_call", &[Some("20240131"), None, Some("20240201")]);
        let df = sanitize_dates(df, &["date_call"]).unwrap();
        let col = df.column("date_call").unwrap().as_materialized_series();
        assert_eq!(
            col.dtype(),
            &DataType::Datetime(TimeUnit::Microseconds, None)
        );
        assert_eq!(col.null_count(), 1);

        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        let phys = col.to_physical_repr();
        assert_eq!(phys.i64().unwrap().get(0), Some(expected));

        let again = sanitize_dates(df.clone(), &["date_call"]).unwrap();
        assert!(again.equals_missing(&df));
    }

    #[test]
    fn test_dates_with_time() {
        let df = text_frame("ts", &[Some("2024-01-31 13:45:10")]);
        let df = sanitize_dates(df, &["ts"]).unwrap();
        let phys = df.column("ts").unwrap().as_materialized_series().to_physical_repr();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31)
            .unwrap()
            .and_hms_opt(13, 45, 10)
            .unwrap()
            .and_utc()
            .timestamp_micros();
        assert_eq!(phys.i64().unwrap().get(0), Some(expected));
    }

    #[test]
    fn test_invalid_date_is_fatal() {
        let df = text_frame("date_call", &[Some("2024-01-31"), Some("not a date")]);
        let err = sanitize_dates(df, &["date_call"]).unwrap_err();
        match err {
            LoaderError::DateParse { column, row, value } => {
                assert_eq!(column, "date_call");
                assert_eq!(row, 1);
                assert_eq!(value, "not a date");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
