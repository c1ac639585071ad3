//! Passive robot discovery.
//!
//! Robots announce themselves with periodic UDP broadcasts on a well-known
//! port. Discovery binds that port for a bounded time and hands every
//! datagram to a plane-specific parser and a caller-supplied filter.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::Result;
use crate::socket::bind_udp;

/// Broadcast port used by the text plane (`robot ip A.B.C.D`).
pub const TEXT_DISCOVERY_PORT: u16 = 40926;

/// Broadcast port used by the binary plane (serial number bytes).
pub const BINARY_DISCOVERY_PORT: u16 = 40927;

const MAX_DATAGRAM: usize = 2048;
const TEXT_ANNOUNCEMENT_PREFIX: &str = "robot ip ";

/// Configuration for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Local address to listen on. Port 0 picks an ephemeral port.
    pub listen: SocketAddr,
    /// How long to listen before giving up.
    pub timeout: Duration,
}

impl DiscoveryConfig {
    /// Listen for text plane announcements.
    pub fn text(timeout: Duration) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, TEXT_DISCOVERY_PORT)),
            timeout,
        }
    }

    /// Listen for binary plane announcements.
    pub fn binary(timeout: Duration) -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, BINARY_DISCOVERY_PORT)),
            timeout,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::binary(Duration::from_secs(5))
    }
}

/// A candidate robot found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered<T> {
    /// Where the announcement came from.
    pub source: SocketAddr,
    /// Plane-specific parsed announcement.
    pub value: T,
}

/// Filter verdict for a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Yield the candidate to the caller.
    pub accept: bool,
    /// Keep listening after this candidate.
    pub keep_listening: bool,
}

impl Decision {
    /// Keep the candidate and continue.
    pub const ACCEPT: Self = Self {
        accept: true,
        keep_listening: true,
    };
    /// Keep the candidate and stop listening.
    pub const ACCEPT_AND_STOP: Self = Self {
        accept: true,
        keep_listening: false,
    };
    /// Drop the candidate and continue.
    pub const SKIP: Self = Self {
        accept: false,
        keep_listening: true,
    };
    /// Drop the candidate and stop listening.
    pub const STOP: Self = Self {
        accept: false,
        keep_listening: false,
    };
}

/// Bounded lazy sequence of discovered robots.
///
/// Yields accepted candidates until the filter stops it or the deadline
/// passes. The socket is released as soon as the sequence ends.
pub struct Discovery<T, P, F> {
    socket: Option<UdpSocket>,
    deadline: Instant,
    parse: P,
    filter: F,
    buf: Vec<u8>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, P, F> Discovery<T, P, F>
where
    P: FnMut(&[u8], SocketAddr) -> Option<T>,
    F: FnMut(&Discovered<T>) -> Decision,
{
    /// Address the listener is bound to, while it is still open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn finish(&mut self) {
        if self.socket.take().is_some() {
            debug!("discovery listener closed");
        }
    }
}

impl<T, P, F> Iterator for Discovery<T, P, F>
where
    P: FnMut(&[u8], SocketAddr) -> Option<T>,
    F: FnMut(&Discovered<T>) -> Decision,
{
    type Item = Result<Discovered<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let socket = self.socket.as_ref()?;

            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.finish();
                return None;
            }
            if let Err(err) = socket.set_read_timeout(Some(remaining)) {
                self.finish();
                return Some(Err(err.into()));
            }

            let (n, source) = match socket.recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    self.finish();
                    return None;
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finish();
                    return Some(Err(err.into()));
                }
            };

            let Some(value) = (self.parse)(&self.buf[..n], source) else {
                trace!(%source, len = n, "ignoring unrecognised announcement");
                continue;
            };

            let candidate = Discovered { source, value };
            let decision = (self.filter)(&candidate);
            if !decision.keep_listening {
                self.finish();
            }
            if decision.accept {
                debug!(%source, "robot discovered");
                return Some(Ok(candidate));
            }
        }
    }
}

/// Start listening for robot announcements.
pub fn discover<T, P, F>(config: &DiscoveryConfig, parse: P, filter: F) -> Result<Discovery<T, P, F>>
where
    P: FnMut(&[u8], SocketAddr) -> Option<T>,
    F: FnMut(&Discovered<T>) -> Decision,
{
    let socket = bind_udp(config.listen, true, true)?;
    debug!(listen = %config.listen, timeout = ?config.timeout, "discovery started");
    Ok(Discovery {
        socket: Some(socket),
        deadline: Instant::now() + config.timeout,
        parse,
        filter,
        buf: vec![0u8; MAX_DATAGRAM],
        _marker: std::marker::PhantomData,
    })
}

/// Collect every distinct candidate announced within the timeout.
///
/// A timeout with no results is an empty list, not an error.
pub fn discover_all<T, P>(config: &DiscoveryConfig, parse: P) -> Result<Vec<Discovered<T>>>
where
    T: PartialEq,
    P: FnMut(&[u8], SocketAddr) -> Option<T>,
{
    let mut found: Vec<Discovered<T>> = Vec::new();
    for candidate in discover(config, parse, |_| Decision::ACCEPT)? {
        let candidate = candidate?;
        if !found.contains(&candidate) {
            found.push(candidate);
        }
    }
    Ok(found)
}

/// Parse a text plane announcement: `robot ip A.B.C.D`.
///
/// The announced address must match the datagram's source address.
pub fn parse_text_announcement(data: &[u8], source: SocketAddr) -> Option<IpAddr> {
    let text = std::str::from_utf8(data).ok()?;
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let ip: IpAddr = text.strip_prefix(TEXT_ANNOUNCEMENT_PREFIX)?.trim().parse().ok()?;
    if ip != source.ip() {
        debug!(announced = %ip, %source, "announcement does not match sender");
        return None;
    }
    Some(ip)
}

/// Parse a binary plane announcement: opaque serial bytes.
pub fn parse_serial_announcement(data: &[u8], _source: SocketAddr) -> Option<Bytes> {
    let end = data.iter().rposition(|&b| b != 0)? + 1;
    Some(Bytes::copy_from_slice(&data[..end]))
}
