//! Stream tabular data through an external program over its stdin/stdout.
//!
//! pipestream launches a child process (optionally under resource limits),
//! sends it batches of rows in one of three wire formats, and collects the
//! child's responses into an output sink.
//!
//! # Crate Structure
//!
//! - [`process`] — Child launching and the cancellable pipe transport
//! - [`codec`] — Value model and the TSV, R-list and Feather wire codecs
//! - [`session`] — Settings, format interfaces and the streaming loop

/// Re-export process types.
pub mod process {
    pub use pipestream_process::*;
}

/// Re-export codec types.
pub mod codec {
    pub use pipestream_codec::*;
}

/// Re-export session types.
pub mod session {
    pub use pipestream_session::*;
}

pub use pipestream_codec::{Batch, Column, ColumnData, ColumnType, MemorySink};
pub use pipestream_process::{CancelToken, ResourceLimits};
pub use pipestream_session::{SessionOptions, StreamSession, StreamSettings};
