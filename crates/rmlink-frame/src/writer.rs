use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use rmlink_transport::ControlStream;

use crate::codec::{encode_frame, Frame, FrameConfig, MAX_FRAME_LEN};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete envelopes to any `Write` stream.
///
/// Each frame is encoded into one buffer and handed to the stream in as few
/// writes as it accepts, so a datagram transport sees exactly one envelope
/// per packet.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN),
            config,
        }
    }

    /// Encode and write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        encode_frame(frame, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameWriter<ControlStream> {
    /// Create a frame writer for a control stream and apply its write timeout.
    pub fn with_config_stream(inner: ControlStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::UdpSocket;

    use bytes::Bytes;
    use rmlink_transport::TransportKind;

    use super::*;
    use crate::codec::{decode, Decoded, MAX_PAYLOAD};
    use crate::reader::FrameReader;

    #[test]
    fn writes_reference_bytes() {
        let mut writer = FrameWriter::new(Vec::new());
        let frame = Frame::request(0x09, 0xc9, 10001, true, 0x3f, 0xd5, Bytes::new());
        writer.write_frame(&frame).unwrap();

        assert_eq!(
            writer.get_ref().as_slice(),
            &[0x55, 0x0d, 0x04, 0x33, 0x09, 0xc9, 0x11, 0x27, 0x40, 0x3f, 0xd5, 0x91, 0x72]
        );
    }

    #[test]
    fn oversized_payload_writes_nothing() {
        let mut writer = FrameWriter::new(Vec::new());
        let frame = Frame::request(1, 2, 3, false, 4, 5, vec![0u8; MAX_PAYLOAD + 1]);

        assert!(matches!(
            writer.write_frame(&frame).unwrap_err(),
            FrameError::PayloadTooLarge { .. }
        ));
        assert!(writer.get_ref().is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TrickleWriter::default());
        let frame = Frame::request(1, 2, 3, false, 4, 5, vec![9u8; 64]);
        writer.write_frame(&frame).unwrap();

        let written = writer.into_inner().bytes;
        match decode(&written) {
            Decoded::Complete { frame: decoded, .. } => assert_eq!(decoded, frame),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = FrameWriter::new(ClosedWriter);
        let frame = Frame::request(1, 2, 3, false, 4, 5, Bytes::new());
        assert!(matches!(
            writer.write_frame(&frame).unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn writer_then_reader_over_buffer() {
        let mut writer = FrameWriter::new(Vec::new());
        for seq in 10..13 {
            writer
                .write_frame(&Frame::request(1, 2, seq, true, 0x48, 0x08, vec![seq as u8]))
                .unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(writer.into_inner()));
        for seq in 10..13 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.seq, seq);
            assert_eq!(frame.payload.as_ref(), &[seq as u8]);
        }
    }

    #[test]
    fn one_datagram_per_frame() {
        let robot = UdpSocket::bind("127.0.0.1:0").unwrap();
        let stream = ControlStream::connect(
            TransportKind::Datagram,
            "127.0.0.1:0".parse().unwrap(),
            robot.local_addr().unwrap(),
            None,
        )
        .unwrap();
        let mut writer = FrameWriter::with_config_stream(stream, FrameConfig::default()).unwrap();

        let first = Frame::request(0x09, 0x38, 1, true, 0x00, 0x01, Bytes::new());
        let second = Frame::request(0x09, 0x38, 2, true, 0x00, 0x01, vec![1, 2, 3]);
        writer.write_frame(&first).unwrap();
        writer.write_frame(&second).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = robot.recv_from(&mut buf).unwrap();
        assert_eq!(n, first.wire_size());
        let (n, _) = robot.recv_from(&mut buf).unwrap();
        assert_eq!(n, second.wire_size());
    }

    #[derive(Default)]
    struct TrickleWriter {
        bytes: Vec<u8>,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.bytes.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
