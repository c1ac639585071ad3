use crate::multiplexer::Token;

/// Errors that can occur in subscription operations.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The robot did not acknowledge an "on" (or "off") command.
    #[error("robot rejected subscription command: {0}")]
    UpstreamRejected(String),

    /// The token is not subscribed to this kind and attribute.
    #[error("unknown subscription token {0}")]
    UnknownToken(Token),

    /// A token was handed out twice. Indicates a bookkeeping bug.
    #[error("subscription token {0} already in use")]
    DuplicateSubscription(Token),

    /// Binary plane session error.
    #[error("session error: {0}")]
    Session(#[from] rmlink_session::SessionError),

    /// Socket setup error.
    #[error("transport error: {0}")]
    Transport(#[from] rmlink_transport::TransportError),

    /// I/O error on a text plane socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The robot sent something the text protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
