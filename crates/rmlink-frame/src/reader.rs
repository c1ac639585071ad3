use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use rmlink_transport::ControlStream;
use tracing::warn;

use crate::codec::{decode, Decoded, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;
const READ_CHUNK_SIZE: usize = 2 * 1024;

/// Reads verified frames from any `Read` stream.
///
/// Handles partial reads internally, and drops corrupt bytes with a warning
/// so callers only ever see frames whose checksums verify. Bytes that belong
/// to an unfinished frame are kept across calls, including across read
/// timeouts.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    rejected: u64,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            rejected: 0,
        }
    }

    /// Read the next verified frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// passes read timeouts through as `FrameError::Io`.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.next_buffered() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn next_buffered(&mut self) -> Option<Frame> {
        loop {
            let (consumed, frame) = match decode(&self.buf) {
                Decoded::Complete { frame, rest } => (self.buf.len() - rest.len(), Some(frame)),
                Decoded::NeedMore => return None,
                Decoded::Invalid { error, skip } => {
                    if !error.is_bad_frame() {
                        self.rejected = self.rejected.saturating_add(1);
                        warn!(%error, dropped = skip, "discarding corrupt frame");
                    } else if self.buf.first().is_some_and(|&b| b == crate::codec::MAGIC) {
                        warn!(%error, "resynchronising frame stream");
                    }
                    (skip, None)
                }
            };
            self.buf.advance(consumed);
            if frame.is_some() {
                return frame;
            }
        }
    }

    /// Number of envelopes dropped because their body checksum failed.
    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<ControlStream> {
    /// Create a frame reader for a control stream and apply its read timeout.
    pub fn with_config_stream(inner: ControlStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: rmlink_transport::TransportError) -> FrameError {
    match err {
        rmlink_transport::TransportError::Io(io) => FrameError::Io(io),
        rmlink_transport::TransportError::Bind { source, .. }
        | rmlink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::codec::{encode_frame, MAGIC};

    fn wire_of(frames: &[Frame]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut wire).unwrap();
        }
        wire.to_vec()
    }

    fn heartbeat(seq: u16) -> Frame {
        Frame::request(0x09, 0x38, seq, false, 0x3f, 0xd5, Bytes::new())
    }

    #[test]
    fn read_multiple_frames() {
        let wire = wire_of(&[heartbeat(1), heartbeat(2), heartbeat(3)]);
        let mut reader = FrameReader::new(Cursor::new(wire));

        for seq in 1..=3 {
            assert_eq!(reader.read_frame().unwrap().seq, seq);
        }
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn partial_read_handling() {
        let frame = Frame::request(0x09, 0x38, 42, true, 0x00, 0x01, vec![7u8; 300]);
        let byte_reader = ByteByByteReader {
            bytes: wire_of(std::slice::from_ref(&frame)),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        assert_eq!(reader.read_frame().unwrap(), frame);
    }

    #[test]
    fn garbage_between_frames_is_skipped() {
        let mut wire = BytesMut::new();
        wire.put_slice(b"noise");
        wire.put_slice(&wire_of(&[heartbeat(10)]));
        wire.put_slice(&[MAGIC, 0xff, 0xff, 0x00]);
        wire.put_slice(&wire_of(&[heartbeat(11)]));

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_frame().unwrap().seq, 10);
        assert_eq!(reader.read_frame().unwrap().seq, 11);
        assert_eq!(reader.rejected_frames(), 0);
    }

    #[test]
    fn corrupt_body_is_dropped_and_counted() {
        let mut wire = wire_of(&[heartbeat(20)]);
        let last = wire.len() - 1;
        wire[last] ^= 0x5a;
        wire.extend_from_slice(&wire_of(&[heartbeat(21)]));

        let mut reader = FrameReader::new(Cursor::new(wire));
        assert_eq!(reader.read_frame().unwrap().seq, 21);
        assert_eq!(reader.rejected_frames(), 1);
    }

    #[test]
    fn connection_closed_mid_frame() {
        let wire = wire_of(&[heartbeat(5)]);
        let mut reader = FrameReader::new(Cursor::new(wire[..wire.len() - 3].to_vec()));
        assert!(matches!(
            reader.read_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn timeout_keeps_partial_frame() {
        let wire = wire_of(&[heartbeat(99)]);
        let split = wire.len() / 2;
        let stream = ScriptedReader {
            steps: vec![
                Ok(wire[..split].to_vec()),
                Err(ErrorKind::WouldBlock),
                Ok(wire[split..].to_vec()),
            ],
        };
        let mut reader = FrameReader::new(stream);

        let err = reader.read_frame().unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(reader.read_frame().unwrap().seq, 99);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct ScriptedReader {
        steps: Vec<std::result::Result<Vec<u8>, ErrorKind>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.steps.is_empty() {
                return Ok(0);
            }
            match self.steps.remove(0) {
                Ok(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Err(kind) => Err(kind.into()),
            }
        }
    }
}
