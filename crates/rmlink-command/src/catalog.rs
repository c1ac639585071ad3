//! Built-in commands.
//!
//! Request and response layouts for the SDK handshake, heartbeat, version
//! query and the subscription ("DDS") command set. Responses carry a return
//! code in their first byte; when it is non-zero the remaining fields may be
//! absent and decode to zero.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use rmlink_transport::TransportKind;

use crate::command::{require, CommandKind, Direction, WireCommand};
use crate::error::{CommandError, Result};

/// Command set of the general queries.
pub const SET_GENERAL: u8 = 0x00;
/// Command set of the SDK handshake and heartbeat.
pub const SET_SDK: u8 = 0x3f;
/// Command set of the subscription service.
pub const SET_SUBSCRIPTION: u8 = 0x48;

/// Network topology the robot is reached through.
///
/// The discriminant is the value carried during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionMode {
    /// The host joins the robot's own access point.
    #[default]
    RobotAp = 0,
    /// Robot and host share an external router.
    Infrastructure = 1,
    /// USB cable exposing an RNDIS network interface.
    UsbRndis = 2,
}

impl ConnectionMode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionMode::RobotAp),
            1 => Some(ConnectionMode::Infrastructure),
            2 => Some(ConnectionMode::UsbRndis),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionMode::RobotAp => "robot-ap",
            ConnectionMode::Infrastructure => "infrastructure",
            ConnectionMode::UsbRndis => "usb-rndis",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robot-ap" | "ap" => Ok(ConnectionMode::RobotAp),
            "infrastructure" | "sta" | "router" => Ok(ConnectionMode::Infrastructure),
            "usb-rndis" | "rndis" | "usb" => Ok(ConnectionMode::UsbRndis),
            other => Err(CommandError::UnknownConnectionMode(other.to_string())),
        }
    }
}

/// Responses made of a return code and nothing else.
macro_rules! retcode_response {
    ($(#[$meta:meta])* $name:ident, $label:literal, $set:expr, $id:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            pub retcode: u8,
        }

        impl WireCommand for $name {
            const NAME: &'static str = $label;
            const SET: u8 = $set;
            const ID: u8 = $id;
            const DIRECTION: Direction = Direction::Response;

            fn encode(&self, dst: &mut BytesMut) {
                dst.put_u8(self.retcode);
            }

            fn decode(payload: Bytes) -> Result<Self> {
                require(Self::NAME, &payload, 1)?;
                Ok(Self {
                    retcode: payload[0],
                })
            }

            fn result_code(&self) -> Option<u8> {
                Some(self.retcode)
            }
        }
    };
}

fn decode_bool(name: &'static str, field: &'static str, value: u8) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(CommandError::InvalidField { name, field, value }),
    }
}

/// Return code of a failed response that omits its body.
fn short_failure(payload: &[u8], full_len: usize) -> Option<u8> {
    match payload.first() {
        Some(&retcode) if retcode != 0 && payload.len() < full_len => Some(retcode),
        _ => None,
    }
}

/// Ask the robot for its firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetVersion;

impl WireCommand for GetVersion {
    const NAME: &'static str = "get_version";
    const SET: u8 = SET_GENERAL;
    const ID: u8 = 0x01;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, _dst: &mut BytesMut) {}

    fn decode(_payload: Bytes) -> Result<Self> {
        Ok(GetVersion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetVersionResponse {
    pub retcode: u8,
    /// `aa.bb.cc.dd`
    pub version: [u8; 4],
}

impl GetVersionResponse {
    const LEN: usize = 5;

    pub fn version_string(&self) -> String {
        let [aa, bb, cc, dd] = self.version;
        format!("{aa:02}.{bb:02}.{cc:02}.{dd:02}")
    }
}

impl WireCommand for GetVersionResponse {
    const NAME: &'static str = "get_version";
    const SET: u8 = SET_GENERAL;
    const ID: u8 = 0x01;
    const DIRECTION: Direction = Direction::Response;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.retcode);
        dst.put_slice(&self.version);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        if let Some(retcode) = short_failure(&payload, Self::LEN) {
            return Ok(Self {
                retcode,
                ..Self::default()
            });
        }
        require(Self::NAME, &payload, Self::LEN)?;
        Ok(Self {
            retcode: payload[0],
            version: [payload[1], payload[2], payload[3], payload[4]],
        })
    }

    fn result_code(&self) -> Option<u8> {
        Some(self.retcode)
    }
}

/// Enter (`true`) or leave (`false`) SDK mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetSdkMode {
    pub enable: bool,
}

impl WireCommand for SetSdkMode {
    const NAME: &'static str = "set_sdk_mode";
    const SET: u8 = SET_SDK;
    const ID: u8 = 0xd1;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(u8::from(self.enable));
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        Ok(Self {
            enable: decode_bool(Self::NAME, "enable", payload[0])?,
        })
    }
}

retcode_response!(SetSdkModeResponse, "set_sdk_mode", SET_SDK, 0xd1);

/// Negotiation request sent to the robot's proxy port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetSdkConnection {
    pub control: u8,
    /// Addressing byte the host will use on the control connection.
    pub host: u8,
    pub mode: ConnectionMode,
    pub transport: TransportKind,
    /// `0.0.0.0` lets the robot pick the address it sees.
    pub ip: Ipv4Addr,
    /// Local port the control connection will be opened from.
    pub port: u16,
}

impl SetSdkConnection {
    const LEN: usize = 10;
}

impl WireCommand for SetSdkConnection {
    const NAME: &'static str = "set_sdk_connection";
    const SET: u8 = SET_SDK;
    const ID: u8 = 0xd4;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.control);
        dst.put_u8(self.host);
        dst.put_u8(self.mode.as_u8());
        dst.put_u8(self.transport.as_u8());
        dst.put_slice(&self.ip.octets());
        dst.put_u16_le(self.port);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, Self::LEN)?;
        let mode = ConnectionMode::from_u8(payload[2]).ok_or(CommandError::InvalidField {
            name: Self::NAME,
            field: "mode",
            value: payload[2],
        })?;
        let transport = TransportKind::from_u8(payload[3]).ok_or(CommandError::InvalidField {
            name: Self::NAME,
            field: "transport",
            value: payload[3],
        })?;
        Ok(Self {
            control: payload[0],
            host: payload[1],
            mode,
            transport,
            ip: Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]),
            port: u16::from_le_bytes([payload[8], payload[9]]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetSdkConnectionResponse {
    pub retcode: u8,
    pub state: u8,
    /// Host address as seen by the robot.
    pub client_ip: Ipv4Addr,
}

impl SetSdkConnectionResponse {
    const LEN: usize = 6;
}

impl WireCommand for SetSdkConnectionResponse {
    const NAME: &'static str = "set_sdk_connection";
    const SET: u8 = SET_SDK;
    const ID: u8 = 0xd4;
    const DIRECTION: Direction = Direction::Response;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.retcode);
        dst.put_u8(self.state);
        dst.put_slice(&self.client_ip.octets());
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        if let Some(retcode) = short_failure(&payload, Self::LEN) {
            return Ok(Self {
                retcode,
                state: 0,
                client_ip: Ipv4Addr::UNSPECIFIED,
            });
        }
        require(Self::NAME, &payload, Self::LEN)?;
        Ok(Self {
            retcode: payload[0],
            state: payload[1],
            client_ip: Ipv4Addr::new(payload[2], payload[3], payload[4], payload[5]),
        })
    }

    fn result_code(&self) -> Option<u8> {
        Some(self.retcode)
    }
}

/// Keepalive; the robot drops the SDK session without one every few seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdkHeartbeat;

impl WireCommand for SdkHeartbeat {
    const NAME: &'static str = "sdk_heartbeat";
    const SET: u8 = SET_SDK;
    const ID: u8 = 0xd5;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, _dst: &mut BytesMut) {}

    fn decode(_payload: Bytes) -> Result<Self> {
        Ok(SdkHeartbeat)
    }
}

retcode_response!(SdkHeartbeatResponse, "sdk_heartbeat", SET_SDK, 0xd5);

/// Register a subscriber node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubNodeAdd {
    pub node_id: u8,
    pub sub_version: u32,
}

impl WireCommand for SubNodeAdd {
    const NAME: &'static str = "sub_node_add";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x01;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.node_id);
        dst.put_u32_le(self.sub_version);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 5)?;
        Ok(Self {
            node_id: payload[0],
            sub_version: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubNodeAddResponse {
    pub retcode: u8,
    pub pub_node_id: u8,
}

impl WireCommand for SubNodeAddResponse {
    const NAME: &'static str = "sub_node_add";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x01;
    const DIRECTION: Direction = Direction::Response;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.retcode);
        dst.put_u8(self.pub_node_id);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        Ok(Self {
            retcode: payload[0],
            pub_node_id: payload.get(1).copied().unwrap_or_default(),
        })
    }

    fn result_code(&self) -> Option<u8> {
        Some(self.retcode)
    }
}

/// Drop every subscription held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubNodeReset {
    pub node_id: u8,
}

impl WireCommand for SubNodeReset {
    const NAME: &'static str = "sub_node_reset";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x02;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.node_id);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        Ok(Self {
            node_id: payload[0],
        })
    }
}

retcode_response!(SubNodeResetResponse, "sub_node_reset", SET_SUBSCRIPTION, 0x02);

/// Start periodic pushes of a set of data items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddSubMsg {
    pub node_id: u8,
    pub msg_id: u8,
    pub timestamp: u8,
    pub stop_when_disconnect: bool,
    pub sub_mode: u8,
    /// Data item identifiers, one per pushed field group.
    pub uids: Vec<u64>,
    /// Push frequency in Hz.
    pub freq: u16,
}

impl WireCommand for AddSubMsg {
    const NAME: &'static str = "add_sub_msg";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x03;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        // The count field is one byte wide.
        let uids = &self.uids[..self.uids.len().min(usize::from(u8::MAX))];
        dst.put_u8(self.node_id);
        dst.put_u8(self.msg_id);
        dst.put_u8(self.timestamp);
        dst.put_u8(u8::from(self.stop_when_disconnect));
        dst.put_u8(self.sub_mode);
        dst.put_u8(uids.len() as u8);
        for uid in uids {
            dst.put_u64_le(*uid);
        }
        dst.put_u16_le(self.freq);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 6)?;
        let count = usize::from(payload[5]);
        let total = 6 + count * 8 + 2;
        require(Self::NAME, &payload, total)?;

        let uids = payload[6..6 + count * 8]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                u64::from_le_bytes(raw)
            })
            .collect();

        Ok(Self {
            node_id: payload[0],
            msg_id: payload[1],
            timestamp: payload[2],
            stop_when_disconnect: decode_bool(Self::NAME, "stop_when_disconnect", payload[3])?,
            sub_mode: payload[4],
            uids,
            freq: u16::from_le_bytes([payload[total - 2], payload[total - 1]]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddSubMsgResponse {
    pub retcode: u8,
    pub pub_node_id: u8,
    pub ack_sub_mode: u8,
    pub ack_msg_id: u8,
    /// Data items the robot refused, as a bitmask over the request's uids.
    pub ack_err_uid_data: u64,
}

impl AddSubMsgResponse {
    const LEN: usize = 12;
}

impl WireCommand for AddSubMsgResponse {
    const NAME: &'static str = "add_sub_msg";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x03;
    const DIRECTION: Direction = Direction::Response;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.retcode);
        dst.put_u8(self.pub_node_id);
        dst.put_u8(self.ack_sub_mode);
        dst.put_u8(self.ack_msg_id);
        dst.put_u64_le(self.ack_err_uid_data);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 1)?;
        if let Some(retcode) = short_failure(&payload, Self::LEN) {
            return Ok(Self {
                retcode,
                ..Self::default()
            });
        }
        require(Self::NAME, &payload, Self::LEN)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&payload[4..12]);
        Ok(Self {
            retcode: payload[0],
            pub_node_id: payload[1],
            ack_sub_mode: payload[2],
            ack_msg_id: payload[3],
            ack_err_uid_data: u64::from_le_bytes(raw),
        })
    }

    fn result_code(&self) -> Option<u8> {
        Some(self.retcode)
    }
}

/// Stop the periodic pushes started by [`AddSubMsg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelMsg {
    pub sub_mode: u8,
    pub node_id: u8,
    pub msg_id: u8,
}

impl WireCommand for DelMsg {
    const NAME: &'static str = "del_msg";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x04;
    const DIRECTION: Direction = Direction::Request;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.sub_mode);
        dst.put_u8(self.node_id);
        dst.put_u8(self.msg_id);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 3)?;
        Ok(Self {
            sub_mode: payload[0],
            node_id: payload[1],
            msg_id: payload[2],
        })
    }
}

retcode_response!(DelMsgResponse, "del_msg", SET_SUBSCRIPTION, 0x04);

/// Periodic data pushed by the robot for an active [`AddSubMsg`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushPeriodMsg {
    pub sub_mode: u8,
    pub msg_id: u8,
    /// Concatenated field data in subscription order.
    pub data: Bytes,
}

impl WireCommand for PushPeriodMsg {
    const NAME: &'static str = "push_period_msg";
    const SET: u8 = SET_SUBSCRIPTION;
    const ID: u8 = 0x08;
    const DIRECTION: Direction = Direction::Request;
    const KIND: CommandKind = CommandKind::Push;

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.sub_mode);
        dst.put_u8(self.msg_id);
        dst.put_slice(&self.data);
    }

    fn decode(payload: Bytes) -> Result<Self> {
        require(Self::NAME, &payload, 2)?;
        Ok(Self {
            sub_mode: payload[0],
            msg_id: payload[1],
            data: payload.slice(2..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;

    fn encoded<T: WireCommand>(command: &T) -> Vec<u8> {
        Command::payload(command).to_vec()
    }

    #[test]
    fn sdk_connection_layout() {
        let request = SetSdkConnection {
            control: 0,
            host: 0x09,
            mode: ConnectionMode::Infrastructure,
            transport: TransportKind::Stream,
            ip: Ipv4Addr::new(192, 168, 2, 20),
            port: 10100,
        };
        assert_eq!(
            encoded(&request),
            vec![0, 0x09, 1, 1, 192, 168, 2, 20, 0x74, 0x27]
        );
        assert_eq!(SetSdkConnection::decode(request.payload()).unwrap(), request);
    }

    #[test]
    fn sdk_connection_rejects_unknown_mode() {
        let payload = Bytes::from_static(&[0, 0x09, 7, 1, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            SetSdkConnection::decode(payload).unwrap_err(),
            CommandError::InvalidField { field: "mode", value: 7, .. }
        ));
    }

    #[test]
    fn sdk_connection_response_carries_client_ip() {
        let response =
            SetSdkConnectionResponse::decode(Bytes::from_static(&[0, 2, 192, 168, 2, 20])).unwrap();
        assert!(response.ok());
        assert_eq!(response.state, 2);
        assert_eq!(response.client_ip, Ipv4Addr::new(192, 168, 2, 20));
    }

    #[test]
    fn failed_response_may_omit_body() {
        let response = GetVersionResponse::decode(Bytes::from_static(&[3])).unwrap();
        assert!(!response.ok());
        assert_eq!(response.retcode, 3);
        assert_eq!(response.version, [0; 4]);
    }

    #[test]
    fn successful_response_needs_body() {
        let err = GetVersionResponse::decode(Bytes::from_static(&[0, 1])).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Truncated {
                expected: 5,
                found: 2,
                ..
            }
        ));
        assert!(matches!(
            SdkHeartbeatResponse::decode(Bytes::new()).unwrap_err(),
            CommandError::Truncated { .. }
        ));
    }

    #[test]
    fn version_string_is_zero_padded() {
        let response = GetVersionResponse::decode(Bytes::from_static(&[0, 1, 2, 3, 4])).unwrap();
        assert!(response.ok());
        assert_eq!(response.version_string(), "01.02.03.04");
    }

    #[test]
    fn add_sub_msg_layout() {
        let request = AddSubMsg {
            node_id: 0x09,
            msg_id: 0x20,
            timestamp: 0,
            stop_when_disconnect: true,
            sub_mode: 0,
            uids: vec![0x0002_0009_eeb7_cece, 0x0002_0009_3664_3ad9],
            freq: 10,
        };
        let wire = encoded(&request);
        assert_eq!(wire.len(), 6 + 16 + 2);
        assert_eq!(&wire[..6], &[0x09, 0x20, 0, 1, 0, 2]);
        assert_eq!(&wire[22..], &[10, 0]);
        assert_eq!(AddSubMsg::decode(Bytes::from(wire)).unwrap(), request);
    }

    #[test]
    fn add_sub_msg_truncated_uids() {
        let payload = Bytes::from_static(&[0x09, 0x20, 0, 1, 0, 2, 1, 2, 3]);
        assert!(matches!(
            AddSubMsg::decode(payload).unwrap_err(),
            CommandError::Truncated { expected: 24, .. }
        ));
    }

    #[test]
    fn push_period_msg_splits_header() {
        let push = PushPeriodMsg::decode(Bytes::from_static(&[0, 0x20, 0xaa, 0xbb])).unwrap();
        assert_eq!(push.msg_id, 0x20);
        assert_eq!(push.data.as_ref(), &[0xaa, 0xbb]);
        assert_eq!(Command::kind(&push), CommandKind::Push);
        assert_eq!(push.retcode(), None);
    }

    #[test]
    fn connection_mode_names() {
        assert_eq!("ap".parse::<ConnectionMode>().unwrap(), ConnectionMode::RobotAp);
        assert_eq!(
            "Infrastructure".parse::<ConnectionMode>().unwrap(),
            ConnectionMode::Infrastructure
        );
        assert_eq!(
            "rndis".parse::<ConnectionMode>().unwrap(),
            ConnectionMode::UsbRndis
        );
        assert!("bluetooth".parse::<ConnectionMode>().is_err());
        assert_eq!(ConnectionMode::UsbRndis.to_string(), "usb-rndis");
    }
}
