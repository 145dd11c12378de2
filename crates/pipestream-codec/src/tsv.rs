//! Line protocol: `<line count>\n` followed by that many `\n`-terminated
//! tab-separated lines. `0\n` alone is the end-of-data sentinel.

use bytes::{Buf, Bytes, BytesMut};
use pipestream_process::ChildIo;
use tracing::trace;

use crate::batch::{Batch, InputSchema};
use crate::error::{CodecError, Result};
use crate::value::{Cell, ColumnType};
use crate::MAX_RESPONSE_SIZE;

/// Bytes searched for the header newline before giving up.
pub const DEFAULT_HEADER_WINDOW: usize = 4096;

const READ_CHUNK_SIZE: usize = 64 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// How string cells are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMode {
    /// Backslash-escape tab, newline, carriage return and backslash.
    #[default]
    Escaped,
    /// Wrap in single quotes, escaping quote and backslash.
    Quoted,
    /// Write the bytes as they are.
    Raw,
}

/// How floating point cells are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// Enough significant digits to round-trip (17 for double, 9 for float).
    #[default]
    MaxDigits,
    /// A fixed number of significant digits.
    Significant(usize),
}

/// Text rendering options for outgoing rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsvFormat {
    pub attribute_delimiter: char,
    pub line_delimiter: char,
    pub null: String,
    pub nan: String,
    pub strings: StringMode,
    pub precision: Precision,
}

impl Default for TsvFormat {
    fn default() -> Self {
        Self {
            attribute_delimiter: '\t',
            line_delimiter: '\n',
            null: "\\N".to_string(),
            nan: "nan".to_string(),
            strings: StringMode::default(),
            precision: Precision::default(),
        }
    }
}

/// Reject input columns that have no text rendering.
pub fn check_schema(schema: &InputSchema) -> Result<()> {
    match schema.types().find(|ty| *ty == ColumnType::Binary) {
        Some(ty) => Err(CodecError::UnsupportedType { format: "tsv", ty }),
        None => Ok(()),
    }
}

/// Render every row of `batch` as one line, appending to `out`.
pub fn encode_rows(batch: &Batch, format: &TsvFormat, out: &mut String) -> Result<()> {
    for row in 0..batch.num_rows() {
        for (i, cell) in batch.row(row).enumerate() {
            if i > 0 {
                out.push(format.attribute_delimiter);
            }
            encode_cell(cell, format, out)?;
        }
        out.push(format.line_delimiter);
    }
    Ok(())
}

fn encode_cell(cell: Cell<'_>, format: &TsvFormat, out: &mut String) -> Result<()> {
    match cell {
        Cell::Null => out.push_str(&format.null),
        Cell::Bool(v) => out.push_str(if v { "true" } else { "false" }),
        Cell::Int32(v) => out.push_str(&v.to_string()),
        Cell::Int64(v) => out.push_str(&v.to_string()),
        Cell::UInt16(v) => out.push_str(&v.to_string()),
        Cell::UInt8(v) => out.push_str(&v.to_string()),
        Cell::Int8(v) => out.push_str(&v.to_string()),
        Cell::Double(v) => push_float(v, digits(format.precision, 17), format, out),
        Cell::Float(v) => push_float(f64::from(v), digits(format.precision, 9), format, out),
        Cell::String(s) => push_string(s, format.strings, out),
        Cell::Binary(_) => {
            return Err(CodecError::UnsupportedType {
                format: "tsv",
                ty: ColumnType::Binary,
            })
        }
    }
    Ok(())
}

fn digits(precision: Precision, max: usize) -> usize {
    match precision {
        Precision::MaxDigits => max,
        Precision::Significant(n) => n.max(1),
    }
}

fn push_float(v: f64, digits: usize, format: &TsvFormat, out: &mut String) {
    if v.is_nan() {
        out.push_str(&format.nan);
    } else {
        out.push_str(&format_general(v, digits));
    }
}

/// `%.{digits}g` formatting: shortest of fixed or exponent notation, trailing
/// zeros removed.
pub fn format_general(v: f64, digits: usize) -> String {
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v.is_nan() {
        return "nan".to_string();
    }
    let digits = digits.max(1);
    let sci = format!("{:.*e}", digits - 1, v);
    let (mantissa, exponent) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            strip_zeros(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        strip_zeros(&format!("{v:.decimals$}")).to_string()
    }
}

fn strip_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

fn push_string(s: &str, mode: StringMode, out: &mut String) {
    match mode {
        StringMode::Raw => out.push_str(s),
        StringMode::Escaped => {
            for c in s.chars() {
                match c {
                    '\t' => out.push_str("\\t"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    c => out.push(c),
                }
            }
        }
        StringMode::Quoted => {
            out.push('\'');
            for c in s.chars() {
                match c {
                    '\'' => out.push_str("\\'"),
                    '\\' => out.push_str("\\\\"),
                    c => out.push(c),
                }
            }
            out.push('\'');
        }
    }
}

/// Send one message: the line count header, then the body if non-empty.
pub fn write_message<I: ChildIo + ?Sized>(io: &mut I, lines: usize, body: &[u8]) -> Result<()> {
    io.hard_write(format!("{lines}\n").as_bytes())?;
    if lines > 0 {
        io.hard_write(body)?;
    }
    trace!(lines, bytes = body.len(), "sent tsv message");
    Ok(())
}

/// Send the end-of-data sentinel `0\n`.
pub fn write_sentinel<I: ChildIo + ?Sized>(io: &mut I) -> Result<()> {
    write_message(io, 0, &[])
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsvMessage {
    /// Line count announced in the header.
    pub lines: usize,
    /// Everything after the header: exactly `lines` newline-terminated lines.
    pub body: Bytes,
}

impl TsvMessage {
    /// The body without its final newline.
    pub fn text(&self) -> &[u8] {
        self.body.strip_suffix(b"\n").unwrap_or(&self.body)
    }
}

/// Reads line-protocol responses, reusing one growable buffer.
#[derive(Debug)]
pub struct TsvReader {
    buf: BytesMut,
    header_window: usize,
    max_response_size: usize,
}

impl Default for TsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TsvReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            header_window: DEFAULT_HEADER_WINDOW,
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    pub fn with_header_window(mut self, window: usize) -> Self {
        self.header_window = window.max(2);
        self
    }

    pub fn with_max_response_size(mut self, max: usize) -> Self {
        self.max_response_size = max;
        self
    }

    /// Read one complete response.
    pub fn read_message<I: ChildIo + ?Sized>(
        &mut self,
        io: &mut I,
        check_liveness: bool,
    ) -> Result<TsvMessage> {
        self.buf.clear();

        let header_end = loop {
            if let Some(i) = self.buf.iter().position(|&b| b == b'\n') {
                if i >= self.header_window {
                    return Err(CodecError::MissingHeaderNewline {
                        window: self.header_window,
                    });
                }
                break i;
            }
            if self.buf.len() >= self.header_window {
                return Err(CodecError::MissingHeaderNewline {
                    window: self.header_window,
                });
            }
            self.fill(io, check_liveness)?;
        };
        let lines = parse_header(&self.buf[..header_end])?;
        self.buf.advance(header_end + 1);

        let mut seen = count_newlines(&self.buf);
        while seen < lines {
            if self.buf.len() > self.max_response_size {
                return Err(CodecError::ResponseTooLarge {
                    size: self.buf.len(),
                    max: self.max_response_size,
                });
            }
            let start = self.buf.len();
            self.fill(io, check_liveness)?;
            seen += count_newlines(&self.buf[start..]);
        }

        if seen > lines {
            return Err(CodecError::TrailingBytes {
                expected: lines,
                extra: seen - lines,
            });
        }
        if !self.buf.is_empty() && self.buf.last() != Some(&b'\n') {
            return Err(CodecError::MissingFinalNewline);
        }
        if self.buf.len() > self.max_response_size {
            return Err(CodecError::ResponseTooLarge {
                size: self.buf.len(),
                max: self.max_response_size,
            });
        }

        trace!(lines, bytes = self.buf.len(), "received tsv message");
        Ok(TsvMessage {
            lines,
            body: self.buf.split().freeze(),
        })
    }

    fn fill<I: ChildIo + ?Sized>(&mut self, io: &mut I, check_liveness: bool) -> Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK_SIZE, 0);
        match io.soft_read(&mut self.buf[start..], check_liveness) {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(())
            }
            Err(err) => {
                self.buf.truncate(start);
                Err(err.into())
            }
        }
    }
}

fn parse_header(header: &[u8]) -> Result<usize> {
    let invalid = || CodecError::InvalidHeader(String::from_utf8_lossy(header).into_owned());
    if header.is_empty() || !header.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(header)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(invalid)
}

fn count_newlines(bytes: &[u8]) -> usize {
    bytes.iter().filter(|&&b| b == b'\n').count()
}
