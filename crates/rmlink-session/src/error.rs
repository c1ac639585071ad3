use std::time::Duration;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is not open (never opened, or already closed).
    #[error("session is not open")]
    NotOpen,

    /// `open` was called on a session that was opened before.
    #[error("session was already opened")]
    AlreadyOpen,

    /// The waiter was aborted because the session closed.
    #[error("cancelled: session closed")]
    Cancelled,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rmlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] rmlink_frame::FrameError),

    /// Command decoding error.
    #[error("command error: {0}")]
    Command(#[from] rmlink_command::CommandError),

    /// A request with the same correlation key is already outstanding.
    #[error("request {seq} to {peer:#04x} for {set:#04x}/{id:#04x} already outstanding")]
    DuplicateCorrelation { peer: u8, set: u8, id: u8, seq: u16 },

    /// The robot never answered the connection request.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The robot answered the connection request with a failure code.
    #[error("negotiation rejected by robot (retcode {0})")]
    NegotiationRejected(u8),

    /// No response arrived within the caller's timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The robot answered a command with a failure code.
    #[error("{command} rejected by robot (retcode {retcode})")]
    Rejected { command: &'static str, retcode: u8 },

    /// The configuration is inconsistent.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// True when the session is gone and the operation cannot be retried.
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionError::NotOpen | SessionError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
