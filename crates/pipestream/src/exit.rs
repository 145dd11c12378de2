use std::fmt;
use std::io;

use pipestream_process::ProcessError;
use pipestream_session::SessionError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;
pub const CANCELLED: i32 = 130;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => FAILURE,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

/// Map a failed session to an exit code by the phase that failed.
pub fn session_error(context: &str, err: SessionError) -> CliError {
    if let SessionError::Process(ProcessError::Launch { source, .. }) = &err {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return CliError::new(PERMISSION_DENIED, format!("{context}: {err}"));
        }
    }
    let code = match err.phase() {
        "settings" => USAGE,
        "launch" | "read" | "write" | "transport" => TRANSPORT_ERROR,
        "protocol" => DATA_INVALID,
        "cancelled" => CANCELLED,
        "session" => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context} ({} phase): {err}", err.phase()))
}
