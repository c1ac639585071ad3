//! Envelope framing for the robot's binary control plane.
//!
//! Every message travels in a CRC-protected envelope:
//! - a 1-byte magic (`0x55`) for stream synchronization
//! - a 10-bit little-endian length plus version bits, guarded by a CRC-8
//! - addressing bytes, a 16-bit sequence id, an attribute byte and the
//!   command set/id pair
//! - the command payload, followed by a CRC-16 over everything before it
//!
//! Invalid bytes never reach callers: the reader resynchronises and logs.

pub mod address;
pub mod codec;
pub mod crc;
pub mod error;
pub mod reader;
pub mod sequence;
pub mod writer;

pub use address::Address;
pub use codec::{
    decode, decode_frame, encode, encode_frame, AckMode, Decoded, Frame, FrameConfig,
    ENVELOPE_OVERHEAD, MAGIC, MAX_FRAME_LEN, MAX_PAYLOAD, VERSION_BITS,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use sequence::{SequenceAllocator, DEFAULT_SEQUENCE_WINDOW};
pub use writer::FrameWriter;
