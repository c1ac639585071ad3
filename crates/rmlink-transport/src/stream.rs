use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::socket::{connect_tcp, connect_udp};

/// Transport used for the control connection.
///
/// The discriminant is the value carried on the wire during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// Connected UDP; one envelope per datagram.
    Datagram = 0,
    /// TCP byte stream.
    #[default]
    Stream = 1,
}

impl TransportKind {
    /// Wire value used in the SDK connection request.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parse the wire value used during negotiation.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransportKind::Datagram),
            1 => Some(TransportKind::Stream),
            _ => None,
        }
    }

    /// Stable lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Datagram => "datagram",
            TransportKind::Stream => "stream",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "datagram" | "udp" => Ok(TransportKind::Datagram),
            "stream" | "tcp" => Ok(TransportKind::Stream),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

/// A connected control channel to the robot. Implements `Read` and `Write`.
///
/// Over UDP, every `write` is sent as one datagram and every `read` returns
/// at most one datagram.
pub struct ControlStream {
    inner: ControlStreamInner,
}

enum ControlStreamInner {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Read for ControlStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ControlStreamInner::Tcp(stream) => stream.read(buf),
            ControlStreamInner::Udp(socket) => socket.recv(buf),
        }
    }
}

impl Write for ControlStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            ControlStreamInner::Tcp(stream) => stream.write(buf),
            ControlStreamInner::Udp(socket) => socket.send(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            ControlStreamInner::Tcp(stream) => stream.flush(),
            ControlStreamInner::Udp(_) => Ok(()),
        }
    }
}

impl ControlStream {
    /// Open a control connection of the given kind from `local` to `remote`.
    pub fn connect(
        kind: TransportKind,
        local: SocketAddr,
        remote: SocketAddr,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        match kind {
            TransportKind::Stream => connect_tcp(local, remote, timeout).map(Self::from_tcp),
            TransportKind::Datagram => connect_udp(local, remote).map(Self::from_udp),
        }
    }

    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: ControlStreamInner::Tcp(stream),
        }
    }

    /// Wrap an already connected UDP socket.
    pub fn from_udp(socket: UdpSocket) -> Self {
        Self {
            inner: ControlStreamInner::Udp(socket),
        }
    }

    /// Transport flavour of this stream.
    pub fn kind(&self) -> TransportKind {
        match &self.inner {
            ControlStreamInner::Tcp(_) => TransportKind::Stream,
            ControlStreamInner::Udp(_) => TransportKind::Datagram,
        }
    }

    /// Set read timeout on the underlying socket.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            ControlStreamInner::Udp(socket) => socket.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => {
                stream.set_write_timeout(timeout).map_err(Into::into)
            }
            ControlStreamInner::Udp(socket) => {
                socket.set_write_timeout(timeout).map_err(Into::into)
            }
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => Ok(Self::from_tcp(stream.try_clone()?)),
            ControlStreamInner::Udp(socket) => Ok(Self::from_udp(socket.try_clone()?)),
        }
    }

    /// Shut the stream down so that blocked readers wake up.
    ///
    /// UDP has no shutdown; readers observe close through their read timeout.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => match stream.shutdown(Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            ControlStreamInner::Udp(_) => Ok(()),
        }
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => stream.local_addr().map_err(Into::into),
            ControlStreamInner::Udp(socket) => socket.local_addr().map_err(Into::into),
        }
    }

    /// Remote address of the socket.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            ControlStreamInner::Tcp(stream) => stream.peer_addr().map_err(Into::into),
            ControlStreamInner::Udp(socket) => socket.peer_addr().map_err(Into::into),
        }
    }
}

impl fmt::Debug for ControlStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlStream")
            .field("kind", &self.kind())
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}
