use pipestream_codec::CodecError;
use pipestream_process::ProcessError;

/// Errors surfaced by a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The operator parameters are inconsistent or malformed.
    #[error("invalid settings: {0}")]
    Settings(String),

    /// Launching or talking to the child failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Encoding a batch or decoding a response failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The session already failed or finished.
    #[error("stream session is already finished")]
    Finished,
}

impl SessionError {
    pub(crate) fn settings(msg: impl Into<String>) -> Self {
        SessionError::Settings(msg.into())
    }

    /// Which phase failed: `launch`, `read`, `write`, `protocol`,
    /// `cancelled`, `settings`, `sink`, `transport` or `session`.
    pub fn phase(&self) -> &'static str {
        match self {
            SessionError::Settings(_) => "settings",
            SessionError::Process(err) | SessionError::Codec(CodecError::Process(err)) => {
                err.phase()
            }
            SessionError::Codec(CodecError::Sink(_)) => "sink",
            SessionError::Codec(CodecError::UnsupportedType { .. }) => "settings",
            SessionError::Codec(err) if err.is_protocol() => "protocol",
            SessionError::Codec(_) => "write",
            SessionError::Finished => "session",
        }
    }

    /// True if the session was stopped by cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.phase() == "cancelled"
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
