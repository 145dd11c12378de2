use std::fmt;

/// Which half of the pipe pair an operation was waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("reading"),
            Direction::Write => f.write_str("writing"),
        }
    }
}

/// How a child process ended when it was found dead mid-exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The child called `exit` (any code).
    Regular(i32),
    /// The child was killed by a signal or otherwise failed.
    Error,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Regular(code) => write!(f, "regular exit, code {code}"),
            ExitKind::Error => f.write_str("error"),
        }
    }
}

/// Errors raised while launching or talking to a child process.
///
/// Every variant except [`ProcessError::Launch`] is raised only after the
/// child has been terminated and reaped.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The child could not be created (pipe, fork, limits or exec failure).
    #[error("failed to launch child `{command}`: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    /// The child exited while the host was still exchanging data with it.
    #[error("child process terminated early while {direction} ({kind})")]
    ChildDied { direction: Direction, kind: ExitKind },

    /// `poll(2)` on one of the pipes failed.
    #[error("poll failed while {direction}: {source}")]
    Poll {
        direction: Direction,
        source: std::io::Error,
    },

    /// Reading from the child's stdout returned end-of-file or an error.
    #[error("error reading from child: {0}")]
    Read(std::io::Error),

    /// Writing to the child's stdin returned zero bytes or an error.
    #[error("error writing to child: {0}")]
    Write(std::io::Error),

    /// The surrounding job was cancelled; the child has been terminated.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation was attempted after the child was terminated.
    #[error("attempt to {0} a child that is no longer alive")]
    NotAlive(&'static str),

    /// Any other OS error while managing the child.
    #[error("child process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Short name of the phase that failed, used in operator-level messages.
    pub fn phase(&self) -> &'static str {
        match self {
            ProcessError::Launch { .. } => "launch",
            ProcessError::ChildDied {
                direction: Direction::Read,
                ..
            }
            | ProcessError::Poll {
                direction: Direction::Read,
                ..
            }
            | ProcessError::Read(_) => "read",
            ProcessError::ChildDied {
                direction: Direction::Write,
                ..
            }
            | ProcessError::Poll {
                direction: Direction::Write,
                ..
            }
            | ProcessError::Write(_) => "write",
            ProcessError::Cancelled => "cancelled",
            ProcessError::NotAlive(_) | ProcessError::Io(_) => "transport",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_died_message_distinguishes_exit_kinds() {
        let clean = ProcessError::ChildDied {
            direction: Direction::Read,
            kind: ExitKind::Regular(0),
        };
        let crashed = ProcessError::ChildDied {
            direction: Direction::Write,
            kind: ExitKind::Error,
        };
        assert_eq!(
            clean.to_string(),
            "child process terminated early while reading (regular exit, code 0)"
        );
        assert_eq!(
            crashed.to_string(),
            "child process terminated early while writing (error)"
        );
    }

    #[test]
    fn phases_follow_direction() {
        assert_eq!(
            ProcessError::Read(std::io::Error::other("eof")).phase(),
            "read"
        );
        assert_eq!(
            ProcessError::Write(std::io::Error::other("epipe")).phase(),
            "write"
        );
        assert_eq!(ProcessError::Cancelled.phase(), "cancelled");
        assert_eq!(
            ProcessError::Launch {
                command: "x".to_string(),
                source: std::io::Error::other("fork"),
            }
            .phase(),
            "launch"
        );
    }
}
