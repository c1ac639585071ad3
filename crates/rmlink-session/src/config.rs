use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::{Range, RangeInclusive};
use std::time::Duration;

use rmlink_command::ConnectionMode;
use rmlink_frame::{Address, DEFAULT_SEQUENCE_WINDOW};
use rmlink_transport::TransportKind;

use crate::error::{Result, SessionError};

/// UDP port the robot accepts connection requests on.
pub const PROXY_PORT: u16 = 30030;

/// Port of the robot's binary control endpoint.
pub const CONTROL_PORT: u16 = 20020;

/// Local ports the control connection is opened from.
pub const LOCAL_PORT_RANGE: RangeInclusive<u16> = 10100..=10500;

/// The robot drops an SDK session that stays silent this long.
pub const MAX_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Address of the robot on a robot-AP network.
pub const DEFAULT_ROBOT_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 1);

/// Configuration for one robot session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Robot IP address.
    pub robot_ip: IpAddr,
    /// Robot port for the connection request.
    pub proxy_port: u16,
    /// Robot port for the control connection.
    pub control_port: u16,
    /// Network topology, sent during negotiation.
    pub mode: ConnectionMode,
    /// Control connection transport, sent during negotiation.
    pub transport: TransportKind,
    /// Local address to bind; unspecified lets the OS pick the interface.
    pub local_ip: IpAddr,
    /// Local ports to pick the control port from, uniformly at random.
    pub local_port_range: RangeInclusive<u16>,
    /// Sender byte of everything this session writes.
    pub client_addr: Address,
    /// Receiver byte of requests.
    pub robot_addr: Address,
    /// Leading byte of the connection request. Always zero in practice.
    pub control_byte: u8,
    /// How long to wait for each connection request reply.
    pub negotiation_timeout: Duration,
    /// How many connection requests to send before giving up.
    pub negotiation_attempts: u32,
    /// TCP connect timeout for the control connection.
    pub connect_timeout: Duration,
    /// Write timeout on the control connection.
    pub write_timeout: Option<Duration>,
    /// Heartbeat period. Must not exceed [`MAX_KEEPALIVE_INTERVAL`].
    pub keepalive_interval: Duration,
    /// Read timeout used by worker threads to notice `close`.
    pub poll_interval: Duration,
    /// Timeout for the commands the session sends on its own behalf.
    pub command_timeout: Duration,
    /// Send `SetSdkMode(true)` after opening and `SetSdkMode(false)` on close.
    pub enter_sdk_mode: bool,
    /// Window the sequence allocator hands ids out of.
    pub sequence_window: Range<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            robot_ip: IpAddr::V4(DEFAULT_ROBOT_IP),
            proxy_port: PROXY_PORT,
            control_port: CONTROL_PORT,
            mode: ConnectionMode::default(),
            transport: TransportKind::default(),
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port_range: LOCAL_PORT_RANGE,
            client_addr: Address::CLIENT,
            robot_addr: Address::ROBOT,
            control_byte: 0,
            negotiation_timeout: Duration::from_secs(1),
            negotiation_attempts: 3,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Some(Duration::from_secs(5)),
            keepalive_interval: Duration::from_secs(4),
            poll_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(3),
            enter_sdk_mode: true,
            sequence_window: DEFAULT_SEQUENCE_WINDOW,
        }
    }
}

impl SessionConfig {
    /// Default configuration for a robot at `robot_ip`.
    pub fn for_robot(robot_ip: IpAddr) -> Self {
        Self {
            robot_ip,
            ..Self::default()
        }
    }

    /// Robot endpoint for the connection request.
    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::new(self.robot_ip, self.proxy_port)
    }

    /// Robot endpoint for the control connection.
    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.robot_ip, self.control_port)
    }

    /// Reject settings the session cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.keepalive_interval.is_zero() || self.keepalive_interval > MAX_KEEPALIVE_INTERVAL {
            return Err(SessionError::InvalidConfig(format!(
                "keepalive interval {:?} must be within (0, {:?}]",
                self.keepalive_interval, MAX_KEEPALIVE_INTERVAL
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(SessionError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.local_port_range.is_empty() {
            return Err(SessionError::InvalidConfig(format!(
                "empty local port range {:?}",
                self.local_port_range
            )));
        }
        if self.negotiation_attempts == 0 {
            return Err(SessionError::InvalidConfig(
                "negotiation needs at least one attempt".to_string(),
            ));
        }
        if self.sequence_window.end <= self.sequence_window.start
            || self.sequence_window.end - self.sequence_window.start < 2
        {
            return Err(SessionError::InvalidConfig(format!(
                "sequence window {:?} holds fewer than two ids",
                self.sequence_window
            )));
        }
        Ok(())
    }
}
