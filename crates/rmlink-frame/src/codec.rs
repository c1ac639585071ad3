use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::crc::{crc16, crc8};
use crate::error::{FrameError, Result};

/// Envelope magic byte.
pub const MAGIC: u8 = 0x55;

/// Version bits OR-ed into the high part of length byte 2.
pub const VERSION_BITS: u8 = 0x04;

/// Header (11 bytes) plus body CRC (2 bytes).
pub const ENVELOPE_OVERHEAD: usize = 13;

/// Largest envelope expressible in the 10-bit length field.
pub const MAX_FRAME_LEN: usize = 0x03ff;

/// Largest payload that fits in one envelope.
pub const MAX_PAYLOAD: usize = MAX_FRAME_LEN - ENVELOPE_OVERHEAD;

const LENGTH_HEADER_SIZE: usize = 4;
const BODY_HEADER_SIZE: usize = 11;
const LENGTH_MASK: u16 = 0x03ff;
const RESPONSE_BIT: u8 = 0x80;
const ACK_SHIFT: u8 = 5;
const ACK_MASK: u8 = 0x03;

/// Acknowledgement mode carried in attribute bits 5–6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckMode {
    /// No acknowledgement requested.
    #[default]
    None = 0,
    /// Acknowledge on receipt.
    Now = 1,
    /// Acknowledge once the command has completed.
    Finish = 2,
}

impl AckMode {
    fn from_bits(bits: u8) -> Self {
        match bits & ACK_MASK {
            1 => AckMode::Now,
            2 => AckMode::Finish,
            // 3 is not produced by the robot; read it as the strongest mode.
            3 => AckMode::Finish,
            _ => AckMode::None,
        }
    }
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// High six bits of length byte 2; carried through, never interpreted.
    pub version: u8,
    /// Addressing byte of the originator.
    pub sender: u8,
    /// Addressing byte of the target.
    pub receiver: u8,
    /// Correlation id.
    pub seq: u16,
    /// Attribute bit 7.
    pub is_response: bool,
    /// Attribute bits 5–6.
    pub ack: AckMode,
    /// Command set.
    pub cmd_set: u8,
    /// Command id within the set.
    pub cmd_id: u8,
    /// Command payload.
    pub payload: Bytes,
}

impl Frame {
    /// Build a request envelope.
    ///
    /// `needs_ack` requests an acknowledgement once the command completes.
    pub fn request(
        sender: u8,
        receiver: u8,
        seq: u16,
        needs_ack: bool,
        cmd_set: u8,
        cmd_id: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: VERSION_BITS,
            sender,
            receiver,
            seq,
            is_response: false,
            ack: if needs_ack {
                AckMode::Finish
            } else {
                AckMode::None
            },
            cmd_set,
            cmd_id,
            payload: payload.into(),
        }
    }

    /// Build the response to this request: addresses swapped, same sequence.
    pub fn response(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            version: VERSION_BITS,
            sender: self.receiver,
            receiver: self.sender,
            seq: self.seq,
            is_response: true,
            ack: AckMode::None,
            cmd_set: self.cmd_set,
            cmd_id: self.cmd_id,
            payload: payload.into(),
        }
    }

    /// The attribute byte as it appears on the wire.
    pub fn attribute(&self) -> u8 {
        let response = if self.is_response { RESPONSE_BIT } else { 0 };
        response | ((self.ack as u8) << ACK_SHIFT)
    }

    /// True when the sender asked for an acknowledgement.
    pub fn needs_ack(&self) -> bool {
        self.ack != AckMode::None
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        ENVELOPE_OVERHEAD + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────┬──────────────┬──────┬────────┬──────────┬───────┬──────┬───────┬───────┬─────────┬────────┐
/// │ 0x55  │ len (10b LE) │ CRC8 │ sender │ receiver │ seq   │ attr │ set   │ id    │ payload │ CRC16  │
/// │ 1B    │ + ver (2B)   │ 1B   │ 1B     │ 1B       │ 2B LE │ 1B   │ 1B    │ 1B    │ N       │ 2B LE  │
/// └───────┴──────────────┴──────┴────────┴──────────┴───────┴──────┴───────┴───────┴─────────┴────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    if frame.payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: frame.payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let len = frame.wire_size();
    let start = dst.len();
    dst.reserve(len);

    dst.put_u8(MAGIC);
    dst.put_u8((len & 0xff) as u8);
    dst.put_u8((((len >> 8) as u8) & 0x03) | (frame.version & !0x03));
    let header_crc = crc8(&dst[start..start + 3]);
    dst.put_u8(header_crc);

    dst.put_u8(frame.sender);
    dst.put_u8(frame.receiver);
    dst.put_u16_le(frame.seq);
    dst.put_u8(frame.attribute());
    dst.put_u8(frame.cmd_set);
    dst.put_u8(frame.cmd_id);
    dst.put_slice(&frame.payload);

    let body_crc = crc16(&dst[start..]);
    dst.put_u16_le(body_crc);
    Ok(())
}

/// Encode a request envelope from its parts.
pub fn encode(
    sender: u8,
    receiver: u8,
    seq: u16,
    needs_ack: bool,
    cmd_set: u8,
    cmd_id: u8,
    payload: &[u8],
) -> Result<Bytes> {
    let frame = Frame::request(
        sender,
        receiver,
        seq,
        needs_ack,
        cmd_set,
        cmd_id,
        Bytes::copy_from_slice(payload),
    );
    let mut buf = BytesMut::with_capacity(frame.wire_size());
    encode_frame(&frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Outcome of decoding the front of a buffer.
#[derive(Debug)]
pub enum Decoded<'a> {
    /// A verified frame, and whatever follows it.
    Complete { frame: Frame, rest: &'a [u8] },
    /// The buffer holds a valid prefix; read more and retry.
    NeedMore,
    /// The front of the buffer is corrupt. Drop `skip` bytes and retry.
    Invalid { error: FrameError, skip: usize },
}

/// Decode one envelope from the front of `buf`.
///
/// Pure: the input is never modified. Header corruption asks the caller to
/// skip a single byte so the stream can resynchronise on the next magic; a
/// body checksum failure skips the whole envelope.
pub fn decode(buf: &[u8]) -> Decoded<'_> {
    let Some(&first) = buf.first() else {
        return Decoded::NeedMore;
    };
    if first != MAGIC {
        return Decoded::Invalid {
            error: FrameError::BadMagic { found: first },
            skip: 1,
        };
    }
    if buf.len() < LENGTH_HEADER_SIZE {
        return Decoded::NeedMore;
    }

    let expected = crc8(&buf[..3]);
    if expected != buf[3] {
        return Decoded::Invalid {
            error: FrameError::BadHeaderChecksum {
                expected,
                found: buf[3],
            },
            skip: 1,
        };
    }

    let len = usize::from(u16::from_le_bytes([buf[1], buf[2]]) & LENGTH_MASK);
    if len < ENVELOPE_OVERHEAD {
        return Decoded::Invalid {
            error: FrameError::BadLength(len),
            skip: 1,
        };
    }
    if buf.len() < len {
        return Decoded::NeedMore;
    }

    let expected = crc16(&buf[..len - 2]);
    let found = u16::from_le_bytes([buf[len - 2], buf[len - 1]]);
    if expected != found {
        return Decoded::Invalid {
            error: FrameError::BadChecksum { expected, found },
            skip: len,
        };
    }

    let attribute = buf[8];
    let frame = Frame {
        version: buf[2] & !0x03,
        sender: buf[4],
        receiver: buf[5],
        seq: u16::from_le_bytes([buf[6], buf[7]]),
        is_response: attribute & RESPONSE_BIT != 0,
        ack: AckMode::from_bits(attribute >> ACK_SHIFT),
        cmd_set: buf[9],
        cmd_id: buf[10],
        payload: Bytes::copy_from_slice(&buf[BODY_HEADER_SIZE..len - 2]),
    };

    Decoded::Complete {
        frame,
        rest: &buf[len..],
    }
}

/// Decode a frame from a growing buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. On corruption the
/// offending bytes are consumed and the error is returned so the caller can
/// report it and call again.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    let (consumed, outcome) = match decode(src) {
        Decoded::Complete { frame, rest } => (src.len() - rest.len(), Ok(Some(frame))),
        Decoded::NeedMore => (0, Ok(None)),
        Decoded::Invalid { error, skip } => (skip, Err(error)),
    };
    src.advance(consumed);
    outcome
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}
