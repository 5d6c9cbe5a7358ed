use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("agent output exceeded {max} bytes")]
    MaxBufferExceeded { max: usize },

    #[error("agent binary not found: {0}")]
    MissingBinary(String),

    #[error("agent exited with code {code} and produced no output")]
    NonZeroExit { code: i32 },

    #[error("agent output could not be parsed")]
    Parse,

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
