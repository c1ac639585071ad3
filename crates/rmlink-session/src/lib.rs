//! One live control session with a robot.
//!
//! This is the layer most callers use. `Session::connect` negotiates the SDK
//! connection, opens the control channel and keeps it alive; `send_sync`
//! turns the asynchronous request/response traffic into blocking calls.

pub mod config;
pub mod correlation;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod negotiation;
pub mod session;

pub use config::{
    SessionConfig, CONTROL_PORT, DEFAULT_ROBOT_IP, LOCAL_PORT_RANGE, MAX_KEEPALIVE_INTERVAL,
    PROXY_PORT,
};
pub use correlation::{Callback, CorrelationKey, CorrelationTable};
pub use error::{Result, SessionError};
pub use negotiation::{connection_request, negotiate, pick_local_port, Negotiated};
pub use session::{PushHandler, Session, SessionState};
