//! Text notification plane.
//!
//! The robot's plaintext SDK takes `;`-terminated commands on a TCP control
//! port and answers each with `ok;` or an error string. Subscribed data
//! arrives on a separate side channel: UDP datagrams for periodic pushes and
//! a TCP stream for events. Both carry records of the form
//! `<w1> <w2> <attribute> <payload...>`.

use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rmlink_transport::socket::{bind_udp, connect_tcp, unspecified_like};
use tracing::{debug, info, trace, warn};

use crate::error::{NotifyError, Result};
use crate::multiplexer::{Dispatcher, Plane};

/// Plaintext command port.
pub const CONTROL_PORT: u16 = 40923;

/// UDP port periodic pushes are sent to.
pub const PUSH_PORT: u16 = 40924;

/// TCP port events are read from.
pub const EVENT_PORT: u16 = 40925;

#[derive(Debug, Clone)]
pub struct TextPlaneConfig {
    pub robot_ip: IpAddr,
    pub control_port: u16,
    /// Local port to receive pushes on.
    pub push_port: u16,
    pub event_port: u16,
    /// Local address to receive pushes on.
    pub push_listen_ip: IpAddr,
    /// Connect and reply timeout for the control connection.
    pub timeout: Duration,
    /// Read timeout used by the side channel thread to notice `stop`.
    pub poll_interval: Duration,
}

impl Default for TextPlaneConfig {
    fn default() -> Self {
        Self {
            robot_ip: IpAddr::V4(Ipv4Addr::new(192, 168, 2, 1)),
            control_port: CONTROL_PORT,
            push_port: PUSH_PORT,
            event_port: EVENT_PORT,
            push_listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl TextPlaneConfig {
    pub fn for_robot(robot_ip: IpAddr) -> Self {
        Self {
            robot_ip,
            ..Self::default()
        }
    }
}

/// One `kind attribute payload` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: String,
    pub attribute: String,
    pub payload: String,
}

/// Split a push or event line into records.
///
/// The first group names the kind with two words; further `;`-separated
/// groups reuse it. Whitespace inside the payload is normalised to single
/// spaces. Empty groups are skipped.
pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let mut kind: Option<String> = None;
    let mut records = Vec::new();

    for group in text.split(';') {
        let words: Vec<&str> = group.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        let rest = match kind {
            Some(_) => &words[..],
            None => {
                if words.len() < 3 {
                    return Err(NotifyError::Protocol(format!(
                        "record {group:?} lacks kind and attribute"
                    )));
                }
                kind = Some(format!("{} {}", words[0], words[1]));
                &words[2..]
            }
        };
        records.push(Record {
            kind: kind.clone().unwrap_or_default(),
            attribute: rest[0].to_string(),
            payload: rest[1..].join(" "),
        });
    }
    Ok(records)
}

/// Numeric identity of a text-plane notification: type in the upper 32 bits,
/// subtype in the lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventCode(u64);

type EventTable = &'static [(&'static str, u32, &'static [(&'static str, u32)])];

const EVENTS: EventTable = &[
    ("chassis push", 1, &[("position", 1), ("attitude", 2), ("status", 3)]),
    ("gimbal push", 2, &[("attitude", 1)]),
    ("armor event", 3, &[("hit", 1)]),
    ("sound event", 4, &[("applause", 1)]),
];

impl EventCode {
    pub const fn new(kind: u32, subtype: u32) -> Self {
        Self(((kind as u64) << 32) | subtype as u64)
    }

    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn kind(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn subtype(self) -> u32 {
        self.0 as u32
    }

    /// Code of a known `(kind, attribute)` pair.
    pub fn lookup(kind: &str, attribute: &str) -> Option<Self> {
        EVENTS.iter().find(|(name, ..)| *name == kind).and_then(|(_, code, attrs)| {
            attrs
                .iter()
                .find(|(attr, _)| *attr == attribute)
                .map(|(_, subtype)| Self::new(*code, *subtype))
        })
    }

    /// The `(kind, attribute)` words of a known code.
    pub fn names(self) -> Option<(&'static str, &'static str)> {
        let (name, _, attrs) = EVENTS.iter().find(|(_, code, _)| *code == self.kind())?;
        let (attr, _) = attrs.iter().find(|(_, subtype)| *subtype == self.subtype())?;
        Some((*name, *attr))
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.names() {
            Some((kind, attr)) => write!(f, "{kind} {attr}"),
            None => write!(f, "{}:{}", self.kind(), self.subtype()),
        }
    }
}

/// Plaintext SDK command connection.
pub struct TextControl {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
}

impl TextControl {
    /// Connect and enter SDK mode.
    pub fn open(config: &TextPlaneConfig) -> Result<Self> {
        let peer = SocketAddr::new(config.robot_ip, config.control_port);
        let local = SocketAddr::new(unspecified_like(config.robot_ip), 0);
        let stream = connect_tcp(local, peer, Some(config.timeout))?;
        stream.set_read_timeout(Some(config.timeout))?;
        stream.set_write_timeout(Some(config.timeout))?;
        let writer = stream.try_clone()?;

        let mut control = Self {
            reader: BufReader::new(stream),
            writer,
            peer,
        };
        control.send_expect_ok("command")?;
        info!(%peer, "text sdk mode entered");
        Ok(control)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one command and return the robot's reply without its `;`.
    pub fn send(&mut self, command: &str) -> Result<String> {
        let command = command.trim().trim_end_matches(';');
        self.writer.write_all(command.as_bytes())?;
        self.writer.write_all(b";")?;
        self.writer.flush()?;
        trace!(command, "sent text command");

        let mut reply = Vec::new();
        if self.reader.read_until(b';', &mut reply)? == 0 {
            return Err(NotifyError::Protocol(format!(
                "connection closed awaiting reply to {command:?}"
            )));
        }
        let reply = String::from_utf8_lossy(&reply);
        let reply = reply.trim().trim_end_matches(';').trim().to_string();
        trace!(command, %reply, "text reply");
        Ok(reply)
    }

    /// Send `command` and fail with `UpstreamRejected` unless the robot
    /// answers `ok;`.
    pub fn send_expect_ok(&mut self, command: &str) -> Result<()> {
        let reply = self.send(command)?;
        if reply != "ok" {
            return Err(NotifyError::UpstreamRejected(format!("{reply};")));
        }
        Ok(())
    }

    /// Leave SDK mode and drop the connection.
    pub fn close(mut self) -> Result<()> {
        self.writer.write_all(b"quit;")?;
        self.writer.flush()?;
        debug!(peer = %self.peer, "text sdk mode left");
        Ok(())
    }
}

impl fmt::Debug for TextControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextControl").field("peer", &self.peer).finish()
    }
}

/// Which side channel a [`TextPlane`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Periodic pushes, UDP.
    Push,
    /// Events, TCP.
    Event,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Push => "push",
            Channel::Event => "event",
        })
    }
}

struct Reader {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    local: SocketAddr,
}

/// One text side channel plus the shared control connection that switches
/// its streams on and off.
pub struct TextPlane {
    control: Arc<Mutex<TextControl>>,
    config: TextPlaneConfig,
    channel: Channel,
    reader: Mutex<Option<Reader>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TextPlane {
    pub fn new(control: Arc<Mutex<TextControl>>, config: TextPlaneConfig, channel: Channel) -> Self {
        Self {
            control,
            config,
            channel,
            reader: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Local address of the running side channel.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.reader).as_ref().map(|reader| reader.local)
    }

    fn command(&self, command: &str) -> Result<()> {
        lock(&self.control).send_expect_ok(command)
    }

    fn spawn_push(&self, dispatcher: Dispatcher<Self>, stop: Arc<AtomicBool>) -> Result<Reader> {
        let listen = SocketAddr::new(self.config.push_listen_ip, self.config.push_port);
        let socket = bind_udp(listen, true, false)?;
        socket.set_read_timeout(Some(self.config.poll_interval))?;
        let local = socket.local_addr()?;
        let robot = self.config.robot_ip;
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("rmlink-text-push".to_string())
            .spawn(move || {
                let mut buf = [0u8; 2048];
                while !flag.load(Ordering::SeqCst) {
                    let (n, from) = match socket.recv_from(&mut buf) {
                        Ok(received) => received,
                        Err(err) if is_poll_timeout(&err) => continue,
                        Err(err) => {
                            warn!(%err, "push socket failed");
                            break;
                        }
                    };
                    if from.ip() != robot {
                        trace!(%from, "ignoring push from foreign host");
                        continue;
                    }
                    deliver(&dispatcher, &String::from_utf8_lossy(&buf[..n]));
                }
            })?;
        Ok(Reader {
            stop,
            thread,
            local,
        })
    }

    fn spawn_event(&self, dispatcher: Dispatcher<Self>, stop: Arc<AtomicBool>) -> Result<Reader> {
        let remote = SocketAddr::new(self.config.robot_ip, self.config.event_port);
        let local = SocketAddr::new(unspecified_like(self.config.robot_ip), 0);
        let stream = connect_tcp(local, remote, Some(self.config.timeout))?;
        stream.set_read_timeout(Some(self.config.poll_interval))?;
        let local = stream.local_addr()?;
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("rmlink-text-event".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(stream);
                let mut pending = Vec::new();
                while !flag.load(Ordering::SeqCst) {
                    // A timed-out read leaves what it got in `pending`.
                    match reader.read_until(b';', &mut pending) {
                        Ok(0) => {
                            debug!(%remote, "event stream closed");
                            break;
                        }
                        Ok(_) if pending.last() == Some(&b';') => {
                            deliver(&dispatcher, &String::from_utf8_lossy(&pending));
                            pending.clear();
                        }
                        Ok(_) => continue,
                        Err(err) if is_poll_timeout(&err) => continue,
                        Err(err) => {
                            warn!(%err, "event stream failed");
                            break;
                        }
                    }
                }
            })?;
        Ok(Reader {
            stop,
            thread,
            local,
        })
    }
}

fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

fn deliver(dispatcher: &Dispatcher<TextPlane>, text: &str) {
    match parse_records(text) {
        Ok(records) => {
            for record in records {
                dispatcher.dispatch(&record.kind, &record.attribute, &record.payload);
            }
        }
        Err(err) => debug!(%err, "dropping malformed record"),
    }
}

impl Plane for TextPlane {
    type Kind = String;
    type Attribute = String;
    type Params = str;
    type Payload = String;

    fn enable(&self, kind: &String, attribute: &String, params: Option<&str>) -> Result<()> {
        match params.map(str::trim).filter(|params| !params.is_empty()) {
            Some(params) => self.command(&format!("{kind} {attribute} on {params}")),
            None => self.command(&format!("{kind} {attribute} on")),
        }
    }

    fn disable(&self, kind: &String, attribute: &String) -> Result<()> {
        self.command(&format!("{kind} {attribute} off"))
    }

    fn start(&self, dispatcher: Dispatcher<Self>) -> Result<()> {
        let mut slot = lock(&self.reader);
        if slot.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let reader = match self.channel {
            Channel::Push => self.spawn_push(dispatcher, stop)?,
            Channel::Event => self.spawn_event(dispatcher, stop)?,
        };
        info!(channel = %self.channel, local = %reader.local, "text side channel open");
        *slot = Some(reader);
        Ok(())
    }

    fn stop(&self) {
        let Some(reader) = lock(&self.reader).take() else {
            return;
        };
        reader.stop.store(true, Ordering::SeqCst);
        if reader.thread.join().is_err() {
            warn!(channel = %self.channel, "side channel thread panicked");
        }
        debug!(channel = %self.channel, "text side channel closed");
    }
}

impl Drop for TextPlane {
    fn drop(&mut self) {
        Plane::stop(self);
    }
}

impl fmt::Debug for TextPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextPlane")
            .field("robot", &self.config.robot_ip)
            .field("channel", &self.channel)
            .field("running", &lock(&self.reader).is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, UdpSocket};
    use std::sync::mpsc;

    use super::*;
    use crate::multiplexer::{Multiplexer, Token};

    /// Answers every control command, recording what it was sent.
    struct TextRobot {
        addr: SocketAddr,
        commands: Arc<Mutex<Vec<String>>>,
        thread: Option<JoinHandle<()>>,
    }

    impl TextRobot {
        fn start(reply: fn(&str) -> &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let commands = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&commands);
            let thread = thread::spawn(move || {
                let (stream, _) = listener.accept().unwrap();
                let mut writer = stream.try_clone().unwrap();
                let mut reader = BufReader::new(stream);
                loop {
                    let mut command = Vec::new();
                    match reader.read_until(b';', &mut command) {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    let command = String::from_utf8(command).unwrap();
                    lock(&seen).push(command.clone());
                    if command == "quit;" {
                        return;
                    }
                    writer.write_all(reply(&command).as_bytes()).unwrap();
                }
            });
            Self {
                addr,
                commands,
                thread: Some(thread),
            }
        }

        fn commands(&self) -> Vec<String> {
            lock(&self.commands).clone()
        }

        fn join(mut self) -> Vec<String> {
            if let Some(thread) = self.thread.take() {
                thread.join().unwrap();
            }
            self.commands()
        }
    }

    fn always_ok(_: &str) -> &'static str {
        "ok;"
    }

    fn config(robot: &TextRobot) -> TextPlaneConfig {
        TextPlaneConfig {
            robot_ip: robot.addr.ip(),
            control_port: robot.addr.port(),
            push_port: 0,
            push_listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            ..TextPlaneConfig::default()
        }
    }

    #[test]
    fn parses_single_record() {
        let records = parse_records("gimbal push attitude 1.0 2.0;").unwrap();
        assert_eq!(
            records,
            vec![Record {
                kind: "gimbal push".to_string(),
                attribute: "attitude".to_string(),
                payload: "1.0 2.0".to_string(),
            }]
        );
        let bare = parse_records("armor event hit 1 0").unwrap();
        assert_eq!(bare[0].kind, "armor event");
        assert_eq!(bare[0].payload, "1 0");
    }

    #[test]
    fn later_groups_inherit_kind() {
        let records = parse_records("chassis push position 1 2 ; attitude 3 4 5 ;").unwrap();
        let flat: Vec<(&str, &str, &str)> = records
            .iter()
            .map(|r| (r.kind.as_str(), r.attribute.as_str(), r.payload.as_str()))
            .collect();
        assert_eq!(
            flat,
            vec![
                ("chassis push", "position", "1 2"),
                ("chassis push", "attitude", "3 4 5"),
            ]
        );
    }

    #[test]
    fn short_record_is_rejected() {
        assert!(matches!(
            parse_records("chassis push;"),
            Err(NotifyError::Protocol(_))
        ));
        assert!(parse_records(" ; ;").unwrap().is_empty());
    }

    #[test]
    fn event_codes_follow_table() {
        let code = EventCode::lookup("chassis push", "attitude").unwrap();
        assert_eq!(code.as_u64(), (1 << 32) | 2);
        assert_eq!((code.kind(), code.subtype()), (1, 2));
        assert_eq!(code.names(), Some(("chassis push", "attitude")));
        assert_eq!(code.to_string(), "chassis push attitude");

        assert_eq!(EventCode::lookup("sound event", "applause"), Some(EventCode::new(4, 1)));
        assert_eq!(EventCode::lookup("armor event", "hit").unwrap().as_u64(), 0x3_0000_0001);
        assert_eq!(EventCode::lookup("gimbal push", "position"), None);
        assert_eq!(EventCode::from_u64(0x9_0000_0001).to_string(), "9:1");
    }

    #[test]
    fn control_handshake_and_rejection() {
        let robot = TextRobot::start(|command| {
            if command.starts_with("bogus") {
                "error;"
            } else {
                "ok;"
            }
        });
        let mut control = TextControl::open(&config(&robot)).unwrap();
        control.send_expect_ok("chassis push attitude on").unwrap();
        let err = control.send_expect_ok("bogus;").unwrap_err();
        assert!(matches!(err, NotifyError::UpstreamRejected(ref reply) if reply == "error;"));
        control.close().unwrap();

        assert_eq!(
            robot.join(),
            vec!["command;", "chassis push attitude on;", "bogus;", "quit;"]
        );
    }

    #[test]
    fn push_channel_delivers_to_subscribers() {
        let robot = TextRobot::start(always_ok);
        let config = config(&robot);
        let control = Arc::new(Mutex::new(TextControl::open(&config).unwrap()));
        let mux = Multiplexer::new(TextPlane::new(control, config, Channel::Push));

        let (tx, rx) = mpsc::channel();
        let token = mux
            .subscribe(
                "gimbal push".to_string(),
                "attitude".to_string(),
                Some("freq 10"),
                move |payload: &String| tx.send(payload.clone()).unwrap(),
            )
            .unwrap();
        let listen = mux.plane().local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(b"chassis push position 1 2;", listen)
            .unwrap();
        sender
            .send_to(b"gimbal push attitude 1.0 2.0;", listen)
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            "1.0 2.0"
        );

        mux.unsubscribe(&"gimbal push".to_string(), &"attitude".to_string(), token)
            .unwrap();
        assert!(mux.plane().local_addr().is_none());
        assert_eq!(
            robot.commands(),
            vec![
                "command;",
                "gimbal push attitude on freq 10;",
                "gimbal push attitude off;",
            ]
        );
    }

    #[test]
    fn three_subscribers_share_one_push_stream() {
        let robot = TextRobot::start(always_ok);
        let config = config(&robot);
        let control = Arc::new(Mutex::new(TextControl::open(&config).unwrap()));
        let mux = Multiplexer::new(TextPlane::new(control, config, Channel::Push));
        let kind = "gimbal push".to_string();
        let attr = "attitude".to_string();

        let (tx, rx) = mpsc::channel();
        let tokens: Vec<Token> = (0..3)
            .map(|id| {
                let tx = tx.clone();
                mux.subscribe(kind.clone(), attr.clone(), None, move |payload: &String| {
                    tx.send((id, payload.clone())).unwrap()
                })
                .unwrap()
            })
            .collect();
        assert_eq!(mux.subscriber_count(&kind, &attr), 3);
        let listen = mux.plane().local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"gimbal push attitude 1.0 2.0", listen).unwrap();
        let mut got: Vec<(i32, String)> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        got.sort();
        assert_eq!(
            got,
            vec![
                (0, "1.0 2.0".to_string()),
                (1, "1.0 2.0".to_string()),
                (2, "1.0 2.0".to_string()),
            ]
        );
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(robot.commands(), vec!["command;", "gimbal push attitude on;"]);

        mux.unsubscribe(&kind, &attr, tokens[0]).unwrap();
        assert_eq!(robot.commands().len(), 2);
        sender.send_to(b"gimbal push attitude 3.0 4.0;", listen).unwrap();
        let mut got: Vec<(i32, String)> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        got.sort();
        assert_eq!(
            got,
            vec![(1, "3.0 4.0".to_string()), (2, "3.0 4.0".to_string())]
        );

        for token in &tokens[1..] {
            mux.unsubscribe(&kind, &attr, *token).unwrap();
        }
        assert_eq!(
            robot.commands(),
            vec!["command;", "gimbal push attitude on;", "gimbal push attitude off;"]
        );
    }

    #[test]
    fn pushes_from_other_hosts_are_ignored() {
        let robot = TextRobot::start(always_ok);
        let config = TextPlaneConfig {
            robot_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)),
            ..config(&robot)
        };
        let control = Arc::new(Mutex::new(TextControl::open(&TextPlaneConfig {
            robot_ip: robot.addr.ip(),
            ..config.clone()
        })
        .unwrap()));
        let mux = Multiplexer::new(TextPlane::new(control, config, Channel::Push));

        let (tx, rx) = mpsc::channel();
        mux.subscribe(
            "chassis push".to_string(),
            "position".to_string(),
            None,
            move |payload: &String| tx.send(payload.clone()).unwrap(),
        )
        .unwrap();
        let listen = mux.plane().local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"chassis push position 1 2;", listen).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn event_channel_reassembles_records() {
        let robot = TextRobot::start(always_ok);
        let events = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = TextPlaneConfig {
            event_port: events.local_addr().unwrap().port(),
            ..config(&robot)
        };
        let control = Arc::new(Mutex::new(TextControl::open(&config).unwrap()));
        let mux = Multiplexer::new(TextPlane::new(control, config, Channel::Event));

        let (tx, rx) = mpsc::channel();
        mux.subscribe(
            "armor event".to_string(),
            "hit".to_string(),
            None,
            move |payload: &String| tx.send(payload.clone()).unwrap(),
        )
        .unwrap();

        let (mut stream, _) = events.accept().unwrap();
        stream.write_all(b"armor event hit 1").unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(60));
        stream.write_all(b" 0;sound event applause 2;armor event hit 2 0;").unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "1 0");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "2 0");
        assert!(robot.commands().contains(&"armor event hit on;".to_string()));
    }

    #[test]
    fn rejected_on_registers_nothing() {
        let robot = TextRobot::start(|command| {
            if command.contains(" on") {
                "fail;"
            } else {
                "ok;"
            }
        });
        let config = config(&robot);
        let control = Arc::new(Mutex::new(TextControl::open(&config).unwrap()));
        let mux = Multiplexer::new(TextPlane::new(control, config, Channel::Push));

        let err = mux
            .subscribe("chassis push".to_string(), "status".to_string(), None, |_: &String| {})
            .unwrap_err();
        assert!(matches!(err, NotifyError::UpstreamRejected(_)));
        assert!(mux.plane().local_addr().is_none());
        assert_eq!(mux.subscriber_count(&"chassis push".to_string(), &"status".to_string()), 0);
    }
}
