//! Typed commands for the robot's binary control plane.
//!
//! Each `(command set, command id)` pair has a request and usually a
//! response layout. The [`CommandRegistry`] maps incoming envelopes to the
//! matching typed command; [`register_all`] builds the process-wide instance
//! from the built-in catalog.

pub mod catalog;
pub mod command;
pub mod error;
pub mod registry;

pub use catalog::{
    AddSubMsg, AddSubMsgResponse, ConnectionMode, DelMsg, DelMsgResponse, GetVersion,
    GetVersionResponse, PushPeriodMsg, SdkHeartbeat, SdkHeartbeatResponse, SetSdkConnection,
    SetSdkConnectionResponse, SetSdkMode, SetSdkModeResponse, SubNodeAdd, SubNodeAddResponse,
    SubNodeReset, SubNodeResetResponse, SET_GENERAL, SET_SDK, SET_SUBSCRIPTION,
};
pub use command::{Command, CommandKind, Direction, Message, WireCommand};
pub use error::{CommandError, Result};
pub use registry::{register_all, registry, CommandRegistry, Constructor, Registration};
