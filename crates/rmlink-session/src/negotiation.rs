//! SDK connection negotiation.
//!
//! Before the control connection exists the host announces, over UDP to the
//! robot's proxy port, which transport it will use and which local port it
//! will connect from. The robot answers with the address it sees the host
//! at.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use rand::Rng;
use rmlink_command::{Command, SetSdkConnection, SetSdkConnectionResponse, WireCommand};
use rmlink_frame::{decode, encode_frame, Decoded, Frame, SequenceAllocator, MAX_FRAME_LEN};
use rmlink_transport::socket::{connect_udp, unspecified_like};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Local port the control connection must be opened from.
    pub local_port: u16,
    /// Host address as seen by the robot.
    pub client_ip: Ipv4Addr,
    /// Connection state byte reported by the robot.
    pub state: u8,
}

/// Pick a local control port uniformly from `range`.
pub fn pick_local_port(range: &RangeInclusive<u16>) -> u16 {
    rand::thread_rng().gen_range(range.clone())
}

/// The connection request this session would send for `local_port`.
pub fn connection_request(config: &SessionConfig, local_port: u16) -> SetSdkConnection {
    let ip = match config.local_ip {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };
    SetSdkConnection {
        control: config.control_byte,
        host: config.client_addr.as_byte(),
        mode: config.mode,
        transport: config.transport,
        ip,
        port: local_port,
    }
}

/// Send the connection request and wait for the robot's reply.
///
/// Each attempt uses a fresh sequence id and waits up to
/// `negotiation_timeout`. Replies to earlier attempts are accepted as well.
pub fn negotiate(
    config: &SessionConfig,
    sequence: &SequenceAllocator,
    local_port: u16,
) -> Result<Negotiated> {
    let proxy = config.proxy_addr();
    let local = SocketAddr::new(unspecified_like(config.robot_ip), 0);
    let socket = connect_udp(local, proxy)?;
    let request = connection_request(config, local_port);
    let mut sent = Vec::with_capacity(config.negotiation_attempts as usize);

    for attempt in 1..=config.negotiation_attempts {
        let seq = sequence.next();
        sent.push(seq);
        let frame = Frame::request(
            config.client_addr.as_byte(),
            config.robot_addr.as_byte(),
            seq,
            true,
            SetSdkConnection::SET,
            SetSdkConnection::ID,
            request.payload(),
        );
        let mut wire = bytes::BytesMut::with_capacity(frame.wire_size());
        encode_frame(&frame, &mut wire)?;
        socket.send(&wire).map_err(rmlink_transport::TransportError::Io)?;
        debug!(%proxy, attempt, seq, local_port, mode = %config.mode, transport = %config.transport, "sent connection request");

        if let Some(response) = await_reply(&socket, &sent, config.negotiation_timeout)? {
            if !response.ok() {
                return Err(SessionError::NegotiationRejected(response.retcode));
            }
            info!(%proxy, client_ip = %response.client_ip, state = response.state, "negotiated sdk connection");
            return Ok(Negotiated {
                local_port,
                client_ip: response.client_ip,
                state: response.state,
            });
        }
        warn!(%proxy, attempt, "no reply to connection request");
    }

    Err(SessionError::NegotiationFailed(format!(
        "no reply from {proxy} after {} attempts",
        config.negotiation_attempts
    )))
}

fn await_reply(
    socket: &UdpSocket,
    sent: &[u16],
    timeout: Duration,
) -> Result<Option<SetSdkConnectionResponse>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_FRAME_LEN];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(rmlink_transport::TransportError::Io)?;

        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            // An ICMP unreachable from a previous attempt; keep waiting.
            Err(err) if err.kind() == ErrorKind::ConnectionRefused => continue,
            Err(err) => return Err(rmlink_transport::TransportError::Io(err).into()),
        };

        let frame = match decode(&buf[..n]) {
            Decoded::Complete { frame, .. } => frame,
            Decoded::NeedMore => {
                debug!(bytes = n, "truncated negotiation reply");
                continue;
            }
            Decoded::Invalid { error, .. } => {
                warn!(%error, "discarding corrupt negotiation reply");
                continue;
            }
        };

        let is_reply = frame.is_response
            && frame.cmd_set == SetSdkConnection::SET
            && frame.cmd_id == SetSdkConnection::ID
            && sent.contains(&frame.seq);
        if !is_reply {
            debug!(set = frame.cmd_set, id = frame.cmd_id, seq = frame.seq, "ignoring unrelated frame");
            continue;
        }

        return SetSdkConnectionResponse::decode(frame.payload)
            .map(Some)
            .map_err(SessionError::from);
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;
    use std::thread;

    use rmlink_command::ConnectionMode;
    use rmlink_transport::TransportKind;

    use super::*;

    fn proxy() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        socket
    }

    fn config_for(proxy: &UdpSocket) -> SessionConfig {
        let addr = proxy.local_addr().unwrap();
        SessionConfig {
            robot_ip: addr.ip(),
            proxy_port: addr.port(),
            negotiation_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }

    fn recv_request(proxy: &UdpSocket) -> (Frame, SocketAddr) {
        let mut buf = [0u8; 2048];
        let (n, from) = proxy.recv_from(&mut buf).unwrap();
        match decode(&buf[..n]) {
            Decoded::Complete { frame, .. } => (frame, from),
            other => panic!("unexpected {other:?}"),
        }
    }

    fn reply(proxy: &UdpSocket, request: &Frame, payload: &[u8], to: SocketAddr) {
        let mut wire = bytes::BytesMut::new();
        encode_frame(&request.response(payload.to_vec()), &mut wire).unwrap();
        proxy.send_to(&wire, to).unwrap();
    }

    #[test]
    fn local_port_stays_in_range() {
        for _ in 0..1000 {
            let port = pick_local_port(&(10100..=10500));
            assert!((10100..=10500).contains(&port));
        }
        assert_eq!(pick_local_port(&(10200..=10200)), 10200);
    }

    #[test]
    fn request_layout_follows_config() {
        let config = SessionConfig {
            mode: ConnectionMode::UsbRndis,
            transport: TransportKind::Datagram,
            control_byte: 0,
            ..SessionConfig::default()
        };
        let payload = connection_request(&config, 10123).payload();
        assert_eq!(payload.as_ref(), &[0, 0x09, 2, 0, 0, 0, 0, 0, 0x8b, 0x27]);
    }

    #[test]
    fn negotiation_returns_client_ip() {
        let proxy = proxy();
        let config = config_for(&proxy);

        let robot = thread::spawn(move || {
            let (request, from) = recv_request(&proxy);
            assert_eq!((request.cmd_set, request.cmd_id), (0x3f, 0xd4));
            assert!(request.needs_ack());
            let parsed = SetSdkConnection::decode(request.payload.clone()).unwrap();
            assert_eq!(parsed.port, 10321);
            assert_eq!(parsed.transport, TransportKind::Stream);
            reply(&proxy, &request, &[0, 2, 127, 0, 0, 1], from);
        });

        let negotiated = negotiate(&config, &SequenceAllocator::new(), 10321).unwrap();
        assert_eq!(negotiated.client_ip, Ipv4Addr::LOCALHOST);
        assert_eq!(negotiated.local_port, 10321);
        assert_eq!(negotiated.state, 2);
        robot.join().unwrap();
    }

    #[test]
    fn negotiation_retries_after_silence() {
        let proxy = proxy();
        let config = config_for(&proxy);

        let robot = thread::spawn(move || {
            let (first, _) = recv_request(&proxy);
            let (second, from) = recv_request(&proxy);
            assert_ne!(first.seq, second.seq);
            reply(&proxy, &second, &[0, 0, 10, 0, 0, 7], from);
        });

        let negotiated = negotiate(&config, &SequenceAllocator::new(), 10400).unwrap();
        assert_eq!(negotiated.client_ip, Ipv4Addr::new(10, 0, 0, 7));
        robot.join().unwrap();
    }

    #[test]
    fn negotiation_rejected_by_retcode() {
        let proxy = proxy();
        let config = config_for(&proxy);

        let robot = thread::spawn(move || {
            let (request, from) = recv_request(&proxy);
            reply(&proxy, &request, &[4], from);
        });

        let err = negotiate(&config, &SequenceAllocator::new(), 10400).unwrap_err();
        assert!(matches!(err, SessionError::NegotiationRejected(4)));
        robot.join().unwrap();
    }

    #[test]
    fn negotiation_gives_up() {
        let proxy = proxy();
        let config = SessionConfig {
            negotiation_attempts: 2,
            negotiation_timeout: Duration::from_millis(50),
            ..config_for(&proxy)
        };

        let err = negotiate(&config, &SequenceAllocator::new(), 10400).unwrap_err();
        assert!(matches!(err, SessionError::NegotiationFailed(_)));
    }
}
