//! Socket plumbing for talking to the robot.
//!
//! Provides a unified byte stream over the two transports the robot offers
//! for its control channel:
//! - TCP streams
//! - connected UDP sockets (one envelope per datagram)
//!
//! This is the lowest layer of rmlink. It also hosts the passive discovery
//! listener, since discovery is nothing more than a timed UDP read loop.

pub mod discovery;
pub mod error;
pub mod socket;
pub mod stream;

pub use discovery::{
    discover, discover_all, parse_serial_announcement, parse_text_announcement, Decision,
    Discovered, Discovery, DiscoveryConfig, BINARY_DISCOVERY_PORT, TEXT_DISCOVERY_PORT,
};
pub use error::{Result, TransportError};
pub use stream::{ControlStream, TransportKind};
