//! Loopback stand-in for a robot, for tests.
//!
//! Answers connection requests on a UDP proxy socket and serves one control
//! connection (TCP or UDP) at a time. Every frame the client writes is
//! recorded; replies come from a caller-supplied responder.

use std::io::{self, ErrorKind, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use rmlink_command::{SetSdkConnection, WireCommand, SET_GENERAL, SET_SUBSCRIPTION};
use rmlink_frame::{decode, encode_frame, Decoded, Frame, FrameReader};
use rmlink_transport::TransportKind;

use crate::config::SessionConfig;

/// Produces the frames to send back for one received frame.
pub type Responder = Arc<dyn Fn(&Frame) -> Option<Vec<Frame>> + Send + Sync>;

const POLL: Duration = Duration::from_millis(20);

/// Answer every request with a successful response.
pub fn acknowledge(frame: &Frame) -> Option<Vec<Frame>> {
    if frame.is_response {
        return None;
    }
    let payload = match (frame.cmd_set, frame.cmd_id) {
        (SET_GENERAL, 0x01) => vec![0, 1, 2, 3, 4],
        (SET_SUBSCRIPTION, 0x03) => {
            let mut payload = vec![0u8; 12];
            payload[3] = frame.payload.get(1).copied().unwrap_or_default();
            payload
        }
        (SET_SUBSCRIPTION, 0x08) => return None,
        _ => vec![0],
    };
    Some(vec![frame.response(payload)])
}

/// Send every request back unchanged apart from the response bit and the
/// swapped addresses.
pub fn echo(frame: &Frame) -> Option<Vec<Frame>> {
    (!frame.is_response).then(|| vec![frame.response(frame.payload.clone())])
}

/// How the mock behaves.
#[derive(Clone)]
pub struct MockOptions {
    pub transport: TransportKind,
    pub responder: Responder,
    /// Payload of the connection request reply.
    pub negotiation_reply: Vec<u8>,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stream,
            responder: Arc::new(acknowledge),
            negotiation_reply: vec![0, 2, 127, 0, 0, 1],
        }
    }
}

enum Peer {
    Tcp(TcpStream),
    Udp(UdpSocket, SocketAddr),
}

struct Shared {
    stop: AtomicBool,
    options: MockOptions,
    received: Mutex<Vec<Frame>>,
    negotiations: Mutex<Vec<SetSdkConnection>>,
    peer: Mutex<Option<Peer>>,
    client: Mutex<Option<SocketAddr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn send(&self, frame: &Frame) -> io::Result<()> {
        let mut wire = BytesMut::new();
        encode_frame(frame, &mut wire).map_err(io::Error::other)?;
        self.send_raw(&wire)
    }

    fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        match lock(&self.peer).as_mut() {
            Some(Peer::Tcp(stream)) => stream.write_all(bytes),
            Some(Peer::Udp(socket, addr)) => socket.send_to(bytes, *addr).map(|_| ()),
            None => Err(io::Error::new(ErrorKind::NotConnected, "no client connected")),
        }
    }

    fn handle(&self, frame: Frame) {
        let replies = (self.options.responder)(&frame);
        lock(&self.received).push(frame);
        for reply in replies.into_iter().flatten() {
            if let Err(err) = self.send(&reply) {
                tracing::debug!(%err, "mock reply failed");
            }
        }
    }
}

/// A fake robot listening on loopback.
pub struct MockRobot {
    proxy_addr: SocketAddr,
    control_addr: SocketAddr,
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl MockRobot {
    pub fn start(options: MockOptions) -> io::Result<Self> {
        let proxy = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
        proxy.set_read_timeout(Some(POLL))?;
        let proxy_addr = proxy.local_addr()?;

        let transport = options.transport;
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            options,
            received: Mutex::new(Vec::new()),
            negotiations: Mutex::new(Vec::new()),
            peer: Mutex::new(None),
            client: Mutex::new(None),
        });

        let mut threads = Vec::new();
        let proxy_shared = Arc::clone(&shared);
        threads.push(thread::spawn(move || serve_proxy(proxy, proxy_shared)));

        let control_addr = match transport {
            TransportKind::Stream => {
                let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
                listener.set_nonblocking(true)?;
                let addr = listener.local_addr()?;
                let shared = Arc::clone(&shared);
                threads.push(thread::spawn(move || serve_tcp(listener, shared)));
                addr
            }
            TransportKind::Datagram => {
                let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))?;
                socket.set_read_timeout(Some(POLL))?;
                let addr = socket.local_addr()?;
                let shared = Arc::clone(&shared);
                threads.push(thread::spawn(move || serve_udp(socket, shared)));
                addr
            }
        };

        Ok(Self {
            proxy_addr,
            control_addr,
            shared,
            threads,
        })
    }

    /// Session settings pointing at this mock with short timeouts.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            robot_ip: self.proxy_addr.ip(),
            proxy_port: self.proxy_addr.port(),
            control_port: self.control_addr.port(),
            transport: self.shared.options.transport,
            local_ip: self.proxy_addr.ip(),
            negotiation_timeout: Duration::from_millis(500),
            poll_interval: POLL,
            command_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }
    }

    /// Every frame received on the control connection so far.
    pub fn received(&self) -> Vec<Frame> {
        lock(&self.shared.received).clone()
    }

    /// Number of received requests for `(set, id)`.
    pub fn count(&self, set: u8, id: u8) -> usize {
        lock(&self.shared.received)
            .iter()
            .filter(|frame| frame.cmd_set == set && frame.cmd_id == id)
            .count()
    }

    /// Payloads of received requests for `(set, id)`, in arrival order.
    pub fn payloads(&self, set: u8, id: u8) -> Vec<Vec<u8>> {
        lock(&self.shared.received)
            .iter()
            .filter(|frame| frame.cmd_set == set && frame.cmd_id == id)
            .map(|frame| frame.payload.to_vec())
            .collect()
    }

    /// Connection requests seen on the proxy port.
    pub fn negotiations(&self) -> Vec<SetSdkConnection> {
        lock(&self.shared.negotiations).clone()
    }

    /// Address the current control connection comes from.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.client)
    }

    /// Send an unsolicited frame to the connected client.
    pub fn push(&self, frame: Frame) -> io::Result<()> {
        self.shared.send(&frame)
    }

    /// Send raw bytes to the connected client.
    pub fn push_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.shared.send_raw(bytes)
    }

    /// Drop the control connection.
    pub fn disconnect(&self) {
        if let Some(Peer::Tcp(stream)) = lock(&self.shared.peer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockRobot {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.disconnect();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn serve_proxy(socket: UdpSocket, shared: Arc<Shared>) {
    let mut buf = [0u8; 2048];
    while !shared.stop.load(Ordering::SeqCst) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        let Decoded::Complete { frame, .. } = decode(&buf[..n]) else {
            continue;
        };
        if frame.cmd_set != SetSdkConnection::SET || frame.cmd_id != SetSdkConnection::ID {
            continue;
        }
        if let Ok(request) = SetSdkConnection::decode(frame.payload.clone()) {
            lock(&shared.negotiations).push(request);
        }
        let mut wire = BytesMut::new();
        let reply = frame.response(shared.options.negotiation_reply.clone());
        if encode_frame(&reply, &mut wire).is_ok() {
            let _ = socket.send_to(&wire, from);
        }
    }
}

fn serve_tcp(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.stop.load(Ordering::SeqCst) {
        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL);
                continue;
            }
            Err(_) => return,
        };
        let Ok(writer) = stream.try_clone() else {
            continue;
        };
        if stream.set_nonblocking(false).is_err() || stream.set_read_timeout(Some(POLL)).is_err()
        {
            continue;
        }
        *lock(&shared.client) = Some(addr);
        *lock(&shared.peer) = Some(Peer::Tcp(writer));

        let mut reader = FrameReader::new(stream);
        while !shared.stop.load(Ordering::SeqCst) {
            match reader.read_frame() {
                Ok(frame) => shared.handle(frame),
                Err(err) if err.is_timeout() => continue,
                Err(_) => break,
            }
        }
        lock(&shared.peer).take();
    }
}

fn serve_udp(socket: UdpSocket, shared: Arc<Shared>) {
    let mut buf = [0u8; 2048];
    let Ok(writer) = socket.try_clone() else {
        return;
    };
    let mut writer = Some(writer);
    while !shared.stop.load(Ordering::SeqCst) {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(_) => continue,
        };
        if let Some(writer) = writer.take() {
            *lock(&shared.client) = Some(from);
            *lock(&shared.peer) = Some(Peer::Udp(writer, from));
        }
        if let Decoded::Complete { frame, .. } = decode(&buf[..n]) {
            shared.handle(frame);
        }
    }
}
