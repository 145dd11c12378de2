//! Streaming sessions: settings, output schema, format interfaces and the
//! launch / stream / finish control loop.
//!
//! ```no_run
//! use pipestream_codec::{Batch, Column, ColumnData, MemorySink};
//! use pipestream_session::{SessionOptions, StreamSession, StreamSettings};
//!
//! let batch = Batch::new(vec![Column::new(
//!     "x",
//!     ColumnData::String(vec![Some("a".into())]),
//! )])?;
//! let settings = StreamSettings::parse("cat", ["format=tsv"])?;
//! let session = StreamSession::launch(settings, &batch.schema(), SessionOptions::default())?;
//! let mut sink = MemorySink::new(1);
//! session.run([batch], &mut sink)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod interface;
pub mod schema;
pub mod session;
pub mod settings;

pub use error::{Result, SessionError};
pub use interface::{interface_for, DfInterface, FeatherInterface, StreamInterface, TsvInterface};
pub use schema::{Attribute, Dimension, OutputSchema};
pub use session::{SessionOptions, SessionSummary, StreamSession};
pub use settings::{StreamSettings, TransferFormat, DEFAULT_CHUNK_SIZE, DEFAULT_TSV_NAME};
