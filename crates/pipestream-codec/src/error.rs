use pipestream_process::ProcessError;

use crate::value::ColumnType;

/// Errors raised while encoding, exchanging or decoding a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The transport failed; the child has already been terminated.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The Arrow IPC encoder or decoder failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// No newline within the first `window` bytes of a line-protocol response.
    #[error("response header has no newline within the first {window} bytes")]
    MissingHeaderNewline { window: usize },

    /// The header line is not a non-negative decimal integer.
    #[error("invalid response header {0:?}")]
    InvalidHeader(String),

    /// More lines arrived than the header announced.
    #[error("response has {extra} extraneous line(s) beyond the {expected} announced")]
    TrailingBytes { expected: usize, extra: usize },

    /// Data followed the last announced line without a terminating newline.
    #[error("response is missing its final newline")]
    MissingFinalNewline,

    /// A response exceeded the size cap.
    #[error("response too large ({size} bytes, max {max})")]
    ResponseTooLarge { size: usize, max: usize },

    /// A fixed byte sequence on the wire did not match.
    #[error("unexpected bytes in {0}")]
    UnexpectedBytes(&'static str),

    /// The response carries a different number of columns than expected.
    #[error("expected {expected} column(s), got {actual}")]
    ColumnCount { expected: usize, actual: usize },

    /// A later column's row count differs from the first column's.
    #[error("lists of different sizes: column {column} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        column: usize,
        expected: usize,
        actual: usize,
    },

    /// A count field on the wire was negative.
    #[error("negative {what} ({value})")]
    NegativeCount { what: &'static str, value: i64 },

    /// A string record carried a length below -1.
    #[error("invalid string length {0}")]
    InvalidStringLength(i32),

    /// A string value in a response is not UTF-8.
    #[error("column {column}: response text is not valid UTF-8")]
    InvalidUtf8 { column: usize },

    /// A column arrived with a different type than expected.
    #[error("column {column}: expected {expected}, found {found}")]
    TypeMismatch {
        column: usize,
        expected: ColumnType,
        found: String,
    },

    /// A decoded value does not fit the expected column type.
    #[error("column {column}: value {value} does not fit {ty}")]
    ValueOutOfRange {
        column: usize,
        ty: ColumnType,
        value: String,
    },

    /// An int64 value cannot travel through a double without loss.
    #[error("column {column}: int64 value {value} cannot be represented exactly as a double")]
    LossyValue { column: usize, value: i64 },

    /// A response holds more rows than the output chunk can take.
    #[error("response has {rows} rows, more than the limit of {max}")]
    TooManyRows { rows: usize, max: usize },

    /// A length-prefixed message did not hold exactly one record batch.
    #[error("expected exactly one record batch per message, found {0}")]
    BatchCount(usize),

    /// The wire format has no encoding for this column type.
    #[error("{format} format does not support {ty} columns")]
    UnsupportedType {
        format: &'static str,
        ty: ColumnType,
    },

    /// Columns of a batch disagree with each other or with the schema.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The output sink rejected a write.
    #[error("output sink error: {0}")]
    Sink(String),
}

impl CodecError {
    /// True for violations of the wire protocol by the child.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            CodecError::Arrow(_)
                | CodecError::MissingHeaderNewline { .. }
                | CodecError::InvalidHeader(_)
                | CodecError::TrailingBytes { .. }
                | CodecError::MissingFinalNewline
                | CodecError::ResponseTooLarge { .. }
                | CodecError::UnexpectedBytes(_)
                | CodecError::ColumnCount { .. }
                | CodecError::RowCountMismatch { .. }
                | CodecError::NegativeCount { .. }
                | CodecError::InvalidStringLength(_)
                | CodecError::InvalidUtf8 { .. }
                | CodecError::TypeMismatch { .. }
                | CodecError::ValueOutOfRange { .. }
                | CodecError::TooManyRows { .. }
                | CodecError::BatchCount(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
