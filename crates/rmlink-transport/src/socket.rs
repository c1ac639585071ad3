//! Socket creation with an explicit local bind.
//!
//! The robot is told which local port to talk back to before the control
//! connection exists, so both TCP and UDP sockets must be bound to that port
//! before connecting. `std::net` cannot bind a TCP socket before `connect`,
//! hence `socket2`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::{Result, TransportError};

/// Unspecified address of the same family as `addr`, for binding an
/// ephemeral local end towards it.
pub fn unspecified_like(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Create a UDP socket bound to `local`.
///
/// `broadcast` enables `SO_BROADCAST`; `reuse_addr` lets several listeners
/// share a well-known discovery port.
pub fn bind_udp(local: SocketAddr, reuse_addr: bool, broadcast: bool) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;

    if reuse_addr {
        socket
            .set_reuse_address(true)
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;
    }
    if broadcast {
        socket
            .set_broadcast(true)
            .map_err(|source| TransportError::Bind {
                addr: local,
                source,
            })?;
    }

    socket
        .bind(&local.into())
        .map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;

    debug!(%local, "bound udp socket");
    Ok(socket.into())
}

/// Create a UDP socket bound to `local` and connected to `remote`.
pub fn connect_udp(local: SocketAddr, remote: SocketAddr) -> Result<UdpSocket> {
    let socket = bind_udp(local, true, false)?;
    socket
        .connect(remote)
        .map_err(|source| TransportError::Connect {
            addr: remote,
            source,
        })?;
    debug!(%local, %remote, "connected udp socket");
    Ok(socket)
}

/// Open a TCP connection to `remote` from the explicit local address `local`.
pub fn connect_tcp(
    local: SocketAddr,
    remote: SocketAddr,
    timeout: Option<Duration>,
) -> Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(local), Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;

    socket
        .set_reuse_address(true)
        .map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;
    socket
        .bind(&local.into())
        .map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;

    let connected = match timeout {
        Some(timeout) => socket.connect_timeout(&remote.into(), timeout),
        None => socket.connect(&remote.into()),
    };
    connected.map_err(|source| TransportError::Connect {
        addr: remote,
        source,
    })?;

    socket.set_nodelay(true)?;

    debug!(%local, %remote, "connected tcp stream");
    Ok(socket.into())
}
