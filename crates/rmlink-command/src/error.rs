use crate::command::Direction;

/// Errors raised while building or decoding commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No constructor is registered for this key.
    #[error("unknown {direction} command {set:#04x}/{id:#04x}")]
    UnknownCommand {
        set: u8,
        id: u8,
        direction: Direction,
    },

    /// A constructor is already registered for this key.
    #[error("{direction} command {set:#04x}/{id:#04x} registered twice ({name})")]
    DuplicateCommand {
        set: u8,
        id: u8,
        direction: Direction,
        name: &'static str,
    },

    /// The payload is shorter than the command layout requires.
    #[error("{name}: payload too short ({found} bytes, need {expected})")]
    Truncated {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// A field holds a value outside its domain.
    #[error("{name}: invalid {field} value {value}")]
    InvalidField {
        name: &'static str,
        field: &'static str,
        value: u8,
    },

    /// A connection mode name could not be parsed.
    #[error("unknown connection mode '{0}' (expected 'robot-ap', 'infrastructure' or 'usb-rndis')")]
    UnknownConnectionMode(String),
}

pub type Result<T> = std::result::Result<T, CommandError>;
