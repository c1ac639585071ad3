//! Robot notification subscriptions.
//!
//! A [`Multiplexer`] lets any number of local subscribers share one upstream
//! subscription per `(kind, attribute)`. It drives a [`Plane`], which knows
//! how to switch a stream on and off and where its data arrives:
//!
//! - [`BinaryPlane`] subscribes through an open [`rmlink_session::Session`]
//!   and receives pushed frames on the same connection.
//! - [`TextPlane`] uses the plaintext SDK: commands over TCP, data over UDP
//!   pushes or a TCP event stream.

pub mod binary;
pub mod error;
pub mod multiplexer;
pub mod text;

pub use binary::{BinaryPlane, BinaryPlaneConfig, DdsParams, PushKind};
pub use error::{NotifyError, Result};
pub use multiplexer::{Dispatcher, Handler, Multiplexer, Plane, Token};
pub use text::{parse_records, Channel, EventCode, Record, TextControl, TextPlane, TextPlaneConfig};
