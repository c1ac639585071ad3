use std::any::Any;
use std::fmt;

use bytes::{Bytes, BytesMut};
use rmlink_frame::Frame;

use crate::error::{CommandError, Result};

/// Which table a command lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Direction implied by an envelope's response bit.
    pub fn of(frame: &Frame) -> Self {
        if frame.is_response {
            Direction::Response
        } else {
            Direction::Request
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => f.write_str("request"),
            Direction::Response => f.write_str("response"),
        }
    }
}

/// How a command reaches the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandKind {
    /// Answered only when asked.
    #[default]
    Pull,
    /// Sent unprompted by the robot.
    Push,
}

/// A typed command with a fixed wire layout.
///
/// Implementors describe one `(set, id, direction)` entry. The blanket
/// [`Command`] impl turns any `WireCommand` into a trait object the registry
/// and session can pass around.
pub trait WireCommand: fmt::Debug + Send + Sync + Sized + 'static {
    const NAME: &'static str;
    const SET: u8;
    const ID: u8;
    const DIRECTION: Direction;
    const KIND: CommandKind = CommandKind::Pull;

    /// Append the payload bytes.
    fn encode(&self, dst: &mut BytesMut);

    /// Parse a payload.
    fn decode(payload: Bytes) -> Result<Self>;

    /// Return code carried in the first payload byte, for responses.
    fn result_code(&self) -> Option<u8> {
        None
    }
}

/// Object-safe view of a decoded command.
pub trait Command: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn set(&self) -> u8;
    fn id(&self) -> u8;
    fn direction(&self) -> Direction;
    fn kind(&self) -> CommandKind;
    /// Encoded payload.
    fn payload(&self) -> Bytes;
    fn retcode(&self) -> Option<u8>;
    /// True when the command carries a zero return code.
    fn ok(&self) -> bool {
        self.retcode() == Some(0)
    }
    fn as_any(&self) -> &dyn Any;
}

impl<T: WireCommand> Command for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn set(&self) -> u8 {
        T::SET
    }

    fn id(&self) -> u8 {
        T::ID
    }

    fn direction(&self) -> Direction {
        T::DIRECTION
    }

    fn kind(&self) -> CommandKind {
        T::KIND
    }

    fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    fn retcode(&self) -> Option<u8> {
        self.result_code()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fail with `Truncated` unless `payload` holds at least `expected` bytes.
pub(crate) fn require(name: &'static str, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() < expected {
        return Err(CommandError::Truncated {
            name,
            expected,
            found: payload.len(),
        });
    }
    Ok(())
}

/// A received envelope together with its decoded command.
#[derive(Debug)]
pub struct Message {
    frame: Frame,
    command: Box<dyn Command>,
}

impl Message {
    pub fn new(frame: Frame, command: Box<dyn Command>) -> Self {
        Self { frame, command }
    }

    /// The envelope as received.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// The decoded command.
    pub fn command(&self) -> &dyn Command {
        self.command.as_ref()
    }

    /// Borrow the command as its concrete type.
    pub fn downcast_ref<T: WireCommand>(&self) -> Option<&T> {
        self.command.as_any().downcast_ref::<T>()
    }

    /// Shorthand for `command().ok()`.
    pub fn ok(&self) -> bool {
        self.command.ok()
    }

    pub fn into_parts(self) -> (Frame, Box<dyn Command>) {
        (self.frame, self.command)
    }
}
