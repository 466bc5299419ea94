//! `COPY ... FROM` data loading.
//!
//! The connection feeds raw `CopyData` payloads to a [`DataLoader`], which
//! splits them into records, converts every field to the column's type and
//! hands whole rows to a [`RowSink`]. Rows only become visible when the
//! loader is finished.
//!
//! ```text
//!   CopyData ──► DataLoader::load_chunk ──► records ──► RowSink::append
//!   CopyDone ──► DataLoader::finish     ──────────────► RowSink::commit
//!   CopyFail ──► DataLoader::abort      ──────────────► RowSink::rollback
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::engine::error::wire_error_info;
use crate::engine::{Column, EngineError};
use crate::protocol::{ErrorInfo, sql_state};
use crate::wire::{OidCache, Value, WireError, text::parse_text};

/// Where the rows of a `COPY ... FROM` come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    Stdin,
    /// A file read by the server.
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyFormat {
    #[default]
    Text,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    pub format: CopyFormat,
    pub delimiter: u8,
    /// Field text that stands for SQL NULL.
    pub null: String,
    /// Skip the first record.
    pub header: bool,
}

impl CopyOptions {
    /// The defaults Postgres applies for `format`.
    pub fn for_format(format: CopyFormat) -> Self {
        match format {
            CopyFormat::Text => Self {
                format,
                delimiter: b'\t',
                null: "\\N".to_string(),
                header: false,
            },
            CopyFormat::Csv => Self {
                format,
                delimiter: b',',
                null: String::new(),
                header: false,
            },
        }
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self::for_format(CopyFormat::Text)
    }
}

/// A parsed `COPY table [(columns)] FROM source [WITH (...)]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFromStatement {
    pub table: String,
    /// Target columns; `None` means every column in table order.
    pub columns: Option<Vec<String>>,
    pub source: CopySource,
    pub options: CopyOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadDataResults {
    pub rows_loaded: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum CopyError {
    #[error("invalid byte sequence for encoding \"UTF8\"")]
    InvalidUtf8,
    #[error("missing data for column \"{0}\"")]
    MissingData(String),
    #[error("extra data after last expected column")]
    ExtraData,
    #[error("unterminated CSV quoted field")]
    UnterminatedQuote,
    #[error(transparent)]
    Value(#[from] WireError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CopyError {
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            CopyError::InvalidUtf8 => {
                ErrorInfo::new(sql_state::CHARACTER_NOT_IN_REPERTOIRE, self.to_string())
            }
            CopyError::MissingData(_) | CopyError::ExtraData | CopyError::UnterminatedQuote => {
                ErrorInfo::new(sql_state::BAD_COPY_FILE_FORMAT, self.to_string())
            }
            CopyError::Value(e) => wire_error_info(e),
            CopyError::Engine(e) => e.to_error_info(),
        }
    }
}

/// Consumes the data stream of one COPY.
pub trait DataLoader: Send {
    fn load_chunk(&mut self, chunk: &[u8]) -> Result<(), CopyError>;

    /// Flushes the last record and makes every loaded row visible.
    fn finish(&mut self) -> Result<LoadDataResults, CopyError>;

    /// Drops everything loaded so far.
    fn abort(&mut self);
}

/// Receives converted rows from a loader.
pub trait RowSink: Send {
    fn append(&mut self, row: Vec<Value>) -> Result<(), EngineError>;

    /// Publishes every appended row and returns how many there were.
    fn commit(&mut self) -> Result<u64, EngineError>;

    fn rollback(&mut self);
}

/// Loader for the `text` and `csv` COPY formats.
pub struct DelimitedLoader<S> {
    options: CopyOptions,
    columns: Vec<Column>,
    oids: Arc<OidCache>,
    sink: S,
    /// Bytes of a record not yet terminated by a newline.
    partial: Vec<u8>,
    header_pending: bool,
    /// Set once the `\.` end marker has been seen.
    ended: bool,
}

impl<S: RowSink> DelimitedLoader<S> {
    pub fn new(options: CopyOptions, columns: Vec<Column>, oids: Arc<OidCache>, sink: S) -> Self {
        let header_pending = options.header;
        Self {
            options,
            columns,
            oids,
            sink,
            partial: Vec::new(),
            header_pending,
            ended: false,
        }
    }

    /// Length of the first complete record in `partial`, including its newline.
    fn record_end(&self) -> Option<usize> {
        let mut in_quotes = false;
        for (i, b) in self.partial.iter().enumerate() {
            match b {
                b'"' if self.options.format == CopyFormat::Csv => in_quotes = !in_quotes,
                b'\n' if !in_quotes => return Some(i + 1),
                _ => {}
            }
        }
        None
    }

    fn process_record(&mut self, mut record: &[u8]) -> Result<(), CopyError> {
        if self.ended {
            return Ok(());
        }
        if let Some(stripped) = record.strip_suffix(b"\n") {
            record = stripped;
        }
        if let Some(stripped) = record.strip_suffix(b"\r") {
            record = stripped;
        }
        if record == b"\\." {
            self.ended = true;
            return Ok(());
        }
        if self.header_pending {
            self.header_pending = false;
            return Ok(());
        }
        let line = std::str::from_utf8(record).map_err(|_| CopyError::InvalidUtf8)?;
        let fields = match self.options.format {
            CopyFormat::Text => split_text(line, self.options.delimiter as char, &self.options.null),
            CopyFormat::Csv => split_csv(line, self.options.delimiter as char, &self.options.null)?,
        };
        if fields.len() > self.columns.len() {
            return Err(CopyError::ExtraData);
        }
        if let Some(column) = self.columns.get(fields.len()) {
            return Err(CopyError::MissingData(column.name.clone()));
        }
        let mut row = Vec::with_capacity(fields.len());
        for (field, column) in fields.into_iter().zip(&self.columns) {
            row.push(match field {
                Some(text) => parse_text(&self.oids, &column.ty, &text)?,
                None => Value::Null,
            });
        }
        self.sink.append(row)?;
        Ok(())
    }
}

impl<S: RowSink> DataLoader for DelimitedLoader<S> {
    fn load_chunk(&mut self, chunk: &[u8]) -> Result<(), CopyError> {
        self.partial.extend_from_slice(chunk);
        while let Some(end) = self.record_end() {
            let record: Vec<u8> = self.partial.drain(..end).collect();
            self.process_record(&record)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<LoadDataResults, CopyError> {
        if !self.partial.is_empty() {
            let record = std::mem::take(&mut self.partial);
            self.process_record(&record)?;
        }
        let rows_loaded = self.sink.commit()?;
        Ok(LoadDataResults { rows_loaded })
    }

    fn abort(&mut self) {
        self.partial.clear();
        self.sink.rollback();
    }
}

/// Splits a text-format line, undoing backslash escapes.
fn split_text(line: &str, delimiter: char, null: &str) -> Vec<Option<String>> {
    let mut fields = Vec::new();
    let mut raw = String::new();
    let mut value = String::new();
    let mut chars = line.chars();
    loop {
        match chars.next() {
            Some('\\') => {
                raw.push('\\');
                if let Some(c) = chars.next() {
                    raw.push(c);
                    value.push(match c {
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\u{b}',
                        other => other,
                    });
                }
            }
            Some(c) if c == delimiter => {
                fields.push(finish_text_field(&mut raw, &mut value, null));
            }
            Some(c) => {
                raw.push(c);
                value.push(c);
            }
            None => {
                fields.push(finish_text_field(&mut raw, &mut value, null));
                return fields;
            }
        }
    }
}

fn finish_text_field(raw: &mut String, value: &mut String, null: &str) -> Option<String> {
    let is_null = raw == null;
    raw.clear();
    let value = std::mem::take(value);
    (!is_null).then_some(value)
}

/// Splits a CSV line. Quoted fields are never NULL.
fn split_csv(line: &str, delimiter: char, null: &str) -> Result<Vec<Option<String>>, CopyError> {
    let mut fields = Vec::new();
    let mut value = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    loop {
        match chars.next() {
            Some('"') if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    value.push('"');
                } else {
                    in_quotes = false;
                }
            }
            Some('"') => {
                in_quotes = true;
                quoted = true;
            }
            Some(c) if c == delimiter && !in_quotes => {
                fields.push(finish_csv_field(&mut value, &mut quoted, null));
            }
            Some(c) => value.push(c),
            None if in_quotes => return Err(CopyError::UnterminatedQuote),
            None => {
                fields.push(finish_csv_field(&mut value, &mut quoted, null));
                return Ok(fields);
            }
        }
    }
}

fn finish_csv_field(value: &mut String, quoted: &mut bool, null: &str) -> Option<String> {
    let value = std::mem::take(value);
    let was_quoted = std::mem::replace(quoted, false);
    (was_quoted || value != null).then_some(value)
}
