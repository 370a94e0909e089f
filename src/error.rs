use thiserror::Error;

/// Which phase of the per-file state machine an error (and a retry
/// callback invocation) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Upload,
    Complete,
    HandleComplete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Upload => "upload",
            Phase::Complete => "complete",
            Phase::HandleComplete => "handleComplete",
        };
        f.write_str(s)
    }
}

/// Context handed to `onError` alongside the error: which phase failed,
/// which attempt this was (1-based), and which block (if the failure is
/// block-scoped).
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub phase: Phase,
    pub attempt: u32,
    pub block_num: Option<u64>,
}

impl ErrorContext {
    pub fn new(phase: Phase, attempt: u32) -> Self {
        Self {
            phase,
            attempt,
            block_num: None,
        }
    }

    pub fn with_block(mut self, block_num: u64) -> Self {
        self.block_num = Some(block_num);
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("unrecognized input shape")]
    InvalidInput,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("server response named neither a PUT nor an AWS upload protocol")]
    ProtocolUnrecognized,

    #[error("failed to initiate AWS multipart upload: {0}")]
    AwsInitiateFailed(String),

    #[error("block upload failed with status {status}: {status_text}")]
    BlockUploadHttpError { status: u16, status_text: String },

    #[error("signer relay failed: {0}")]
    SignerRelayFailed(String),

    #[error("failed to complete upload: {0}")]
    CompleteFailed(String),

    #[error("failed to finalize AWS upload handle: {0}")]
    HandleCompleteFailed(String),

    #[error("stream read failed: {0}")]
    StreamReadError(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend rejected the request: {0}")]
    Envelope(String),

    #[error("upload aborted")]
    Aborted,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
