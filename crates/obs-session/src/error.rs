use thiserror::Error;

/// A frame from the production tool that could not be understood.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no opcode")]
    MissingOpcode,

    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),

    #[error("opcode {0} frame has no payload")]
    MissingPayload(u8),

    #[error("invalid payload for opcode {op}: {reason}")]
    InvalidPayload { op: u8, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("session is not ready")]
    NotReady,

    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    #[error("request failed with code {code}: {}", .comment.as_deref().unwrap_or("no comment"))]
    RequestFailed { code: i64, comment: Option<String> },

    #[error("session closed before the request completed")]
    Closed,

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("session driver has stopped")]
    DriverStopped,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
