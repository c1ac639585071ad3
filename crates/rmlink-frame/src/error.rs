/// Errors that can occur during envelope encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The first byte is not the envelope magic.
    #[error("invalid frame magic {found:#04x} (expected 0x55)")]
    BadMagic { found: u8 },

    /// The CRC-8 over the length header does not match.
    #[error("header checksum mismatch (expected {expected:#04x}, got {found:#04x})")]
    BadHeaderChecksum { expected: u8, found: u8 },

    /// The length field is smaller than an empty envelope.
    #[error("frame length {0} out of range")]
    BadLength(usize),

    /// The CRC-16 over the envelope body does not match.
    #[error("body checksum mismatch (expected {expected:#06x}, got {found:#06x})")]
    BadChecksum { expected: u16, found: u16 },

    /// The payload does not fit in a 10-bit envelope length.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True for header-level corruption (magic, header CRC, length).
    ///
    /// These are resolved by skipping one byte and resynchronising.
    pub fn is_bad_frame(&self) -> bool {
        matches!(
            self,
            FrameError::BadMagic { .. }
                | FrameError::BadHeaderChecksum { .. }
                | FrameError::BadLength(_)
        )
    }

    /// True when a read timed out rather than failed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
