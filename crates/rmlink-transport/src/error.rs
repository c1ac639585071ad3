use std::net::SocketAddr;

/// Errors that can occur in robot transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified local address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified remote address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on an established socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport name could not be parsed.
    #[error("unknown transport '{0}' (expected 'datagram' or 'stream')")]
    UnknownTransport(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
