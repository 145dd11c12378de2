//! Child process launching and a cancellable, poll-based pipe transport.
//!
//! A [`ChildCommand`] describes what to run (a `/bin/sh -c` line or an argv,
//! an optional explicit environment, optional [`ResourceLimits`]).
//! [`ChildProcess::spawn`] launches it with stdin/stdout on non-blocking pipes
//! and exposes the [`ChildIo`] operations used by the wire codecs:
//!
//! - `soft_read` returns whatever is available (at least one byte)
//! - `hard_read` fills a buffer completely
//! - `hard_write` writes a buffer completely
//!
//! Each blocking wait is sliced into short polls so a [`CancelToken`] or a
//! dead child is noticed promptly; on any failure the child is terminated
//! before the error is returned.

pub mod cancel;
pub mod error;
pub mod limits;
pub mod traits;

#[cfg(unix)]
pub mod launcher;
#[cfg(unix)]
pub mod transport;

pub use cancel::CancelToken;
pub use error::{Direction, ExitKind, ProcessError, Result};
pub use limits::ResourceLimits;
pub use traits::ChildIo;

#[cfg(unix)]
pub use launcher::{launch, ChildCommand, ChildHandle, Invocation};
#[cfg(unix)]
pub use transport::{ChildProcess, ProcessConfig};
