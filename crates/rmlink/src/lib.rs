//! Client library for the RoboMaster robot SDK protocol.
//!
//! rmlink talks to a robot over its binary envelope protocol (negotiated
//! control connection, correlated requests, keepalive) and shares
//! notification subscriptions between local consumers.
//!
//! # Crate Structure
//!
//! - [`transport`]: sockets, control stream, discovery
//! - [`frame`]: envelope codec, checksums, sequence ids
//! - [`command`]: command trait, catalog and registry
//! - [`session`]: negotiation, request correlation, keepalive
//! - [`notify`]: subscription multiplexing over the binary and text planes
//!   (behind the `notify` feature)

/// Re-export transport types.
pub mod transport {
    pub use rmlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rmlink_frame::*;
}

/// Re-export command types.
pub mod command {
    pub use rmlink_command::*;
}

/// Re-export session types.
pub mod session {
    pub use rmlink_session::*;
}

/// Re-export notification types (requires `notify` feature).
#[cfg(feature = "notify")]
pub mod notify {
    pub use rmlink_notify::*;
}

pub use rmlink_session::{Session, SessionConfig};
