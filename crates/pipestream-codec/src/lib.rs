//! Wire codecs for streaming tabular data through a child process.
//!
//! Three formats share one value model ([`Batch`], [`ColumnData`]) and one
//! output model ([`OutputSink`], [`OutputCursor`]):
//!
//! - [`tsv`]: `<line count>\n` + tab-separated lines
//! - [`rlist`]: R native serialization of a named list of vectors
//! - [`feather`]: 8-byte little-endian length + Arrow IPC file
//!
//! Codecs talk to the child through [`pipestream_process::ChildIo`].

pub mod batch;
pub mod error;
pub mod feather;
pub mod rlist;
pub mod sink;
pub mod tsv;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{Batch, Column, Field, InputSchema};
pub use error::{CodecError, Result};
pub use sink::{write_columns, MemorySink, OutputCursor, OutputSink, Position};
pub use tsv::{TsvFormat, TsvMessage, TsvReader};
pub use value::{Cell, ColumnData, ColumnType, UnknownType, Value};

/// Largest response accepted from a child, in bytes.
pub const MAX_RESPONSE_SIZE: usize = 1 << 30;
