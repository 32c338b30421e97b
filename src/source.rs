//! Reading raw usage exports into a text-only frame.

use crate::error::{LoaderError, Result, ResultExt as _};
use encoding_rs::Encoding;
use polars::prelude::*;
use std::io::{Cursor, Read as _};
use std::path::Path;

/// Physical format of the exports.
#[derive(Debug, Clone, Copy)]
pub struct SourceFormat {
    pub encoding: &'static Encoding,
    pub separator: u8,
    pub quote: u8,
}

impl Default for SourceFormat {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_16LE,
            separator: b';',
            quote: b'"',
        }
    }
}

impl SourceFormat {
    /// Builds a format for a WHATWG encoding label such as `utf-16` or `utf-8`.
    pub fn with_encoding_label(label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| LoaderError::Config(format!("Unknown source encoding: {label}")))?;
        Ok(Self {
            encoding,
            ..Self::default()
        })
    }
}

/// Reads a whole export with every column kept as text.
///
/// A byte-order mark overrides the configured encoding. The read buffer is
/// reserved up front so an export too large for memory surfaces as
/// [`LoaderError::ResourceExhausted`] instead of aborting the process.
pub fn read_source_file(path: &Path, format: &SourceFormat) -> Result<DataFrame> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let len = file.metadata()?.len();

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(usize::try_from(len).unwrap_or(usize::MAX))
        .map_err(|e| {
            LoaderError::ResourceExhausted(format!("{} ({len} bytes): {e}", path.display()))
        })?;
    file.read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let (text, used, had_errors) = format.encoding.decode(&bytes);
    if had_errors {
        tracing::warn!(
            "{} contains bytes invalid for {}, replaced with U+FFFD",
            path.display(),
            used.name()
        );
    }

    parse_text(text.as_bytes(), format)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_text(utf8: &[u8], format: &SourceFormat) -> Result<DataFrame> {
    let separator = format.separator;
    let quote = format.quote;
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| {
            opts.with_separator(separator)
                .with_quote_char(Some(quote))
                .with_missing_is_null(true)
        })
        .into_reader_with_file_handle(Cursor::new(utf8.to_vec()))
        .finish()?;
    Ok(df)
}
