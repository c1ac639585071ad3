//! Binary notification plane.
//!
//! Subscriptions are set up with `AddSubMsg`/`DelMsg` on the session's
//! control connection, and the data comes back on the same connection as
//! pushed frames. The attribute of a subscription is its message id.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rmlink_command::{
    AddSubMsg, DelMsg, Message, PushPeriodMsg, SubNodeAdd, SubNodeReset, WireCommand,
};
use rmlink_session::{PushHandler, Session, SessionError};
use tracing::{debug, info};

use crate::error::{NotifyError, Result};
use crate::multiplexer::{Dispatcher, Plane};

/// Subscriber node id: host 9, index 6.
pub const DEFAULT_NODE_ID: u8 = 0xc9;

/// Subscription protocol version announced when the node is registered.
pub const DEFAULT_SUB_VERSION: u32 = 0x0300_0000;

/// Command carrying pushed data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushKind {
    pub set: u8,
    pub id: u8,
}

impl Default for PushKind {
    fn default() -> Self {
        Self {
            set: PushPeriodMsg::SET,
            id: PushPeriodMsg::ID,
        }
    }
}

impl fmt::Display for PushKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}/0x{:02x}", self.set, self.id)
    }
}

/// What to push and how often.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DdsParams {
    pub uids: Vec<u64>,
    /// Push frequency in Hz.
    pub freq: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryPlaneConfig {
    pub node_id: u8,
    pub sub_version: u32,
    pub sub_mode: u8,
    /// Ask the robot to drop the subscription if the session goes away.
    pub stop_when_disconnect: bool,
}

impl Default for BinaryPlaneConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID,
            sub_version: DEFAULT_SUB_VERSION,
            sub_mode: 0,
            stop_when_disconnect: true,
        }
    }
}

fn upstream(err: SessionError) -> NotifyError {
    match err {
        SessionError::Rejected { command, retcode } => {
            NotifyError::UpstreamRejected(format!("{command} returned {retcode}"))
        }
        other => NotifyError::Session(other),
    }
}

/// Subscriptions carried by an open [`Session`].
///
/// Subscriber handlers run on the session receive thread and must hand any
/// session round trip to another thread.
pub struct BinaryPlane {
    session: Arc<Session>,
    config: BinaryPlaneConfig,
}

impl BinaryPlane {
    /// Register this host as a subscriber node on the robot.
    pub fn attach(session: Arc<Session>, config: BinaryPlaneConfig) -> Result<Self> {
        session
            .call(&SubNodeAdd {
                node_id: config.node_id,
                sub_version: config.sub_version,
            })
            .map_err(upstream)?;
        info!(node_id = config.node_id, "subscriber node registered");
        Ok(Self { session, config })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn config(&self) -> &BinaryPlaneConfig {
        &self.config
    }
}

impl Plane for BinaryPlane {
    type Kind = PushKind;
    type Attribute = u8;
    type Params = DdsParams;
    type Payload = Bytes;

    fn enable(&self, _kind: &PushKind, msg_id: &u8, params: Option<&DdsParams>) -> Result<()> {
        let params = params.ok_or_else(|| {
            NotifyError::Protocol(format!("subscription {msg_id} needs data uids"))
        })?;
        self.session
            .call(&AddSubMsg {
                node_id: self.config.node_id,
                msg_id: *msg_id,
                timestamp: 0,
                stop_when_disconnect: self.config.stop_when_disconnect,
                sub_mode: self.config.sub_mode,
                uids: params.uids.clone(),
                freq: params.freq,
            })
            .map_err(upstream)?;
        Ok(())
    }

    fn disable(&self, _kind: &PushKind, msg_id: &u8) -> Result<()> {
        self.session
            .call(&DelMsg {
                sub_mode: self.config.sub_mode,
                node_id: self.config.node_id,
                msg_id: *msg_id,
            })
            .map_err(upstream)?;
        Ok(())
    }

    fn start(&self, dispatcher: Dispatcher<Self>) -> Result<()> {
        let handler: PushHandler = Arc::new(move |message: &Message| {
            let frame = message.frame();
            let kind = PushKind {
                set: frame.cmd_set,
                id: frame.cmd_id,
            };
            match message.downcast_ref::<PushPeriodMsg>() {
                Some(push) => {
                    dispatcher.dispatch(&kind, &push.msg_id, &push.data);
                }
                None => {
                    let attribute = frame.payload.get(1).copied().unwrap_or_default();
                    dispatcher.dispatch(&kind, &attribute, &frame.payload);
                }
            }
        });
        if self.session.set_push_handler(Some(handler)).is_some() {
            debug!("replaced existing push handler");
        }
        Ok(())
    }

    fn stop(&self) {
        self.session.set_push_handler(None);
    }
}

impl Drop for BinaryPlane {
    fn drop(&mut self) {
        if !self.session.is_open() {
            return;
        }
        let reset = SubNodeReset {
            node_id: self.config.node_id,
        };
        if let Err(err) = self.session.call(&reset) {
            debug!(%err, "subscriber node reset failed");
        }
    }
}

impl fmt::Debug for BinaryPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryPlane")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}
