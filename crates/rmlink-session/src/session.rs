use std::fmt;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rmlink_command::{
    register_all, Command, CommandKind, CommandRegistry, Direction, Message, SdkHeartbeat,
    SetSdkMode,
};
use rmlink_frame::{Frame, FrameConfig, FrameError, FrameReader, FrameWriter, SequenceAllocator};
use rmlink_transport::{ControlStream, TransportError};
use tracing::{debug, error, info, trace, warn};

use crate::config::SessionConfig;
use crate::correlation::{Callback, CorrelationKey, CorrelationTable};
use crate::error::{Result, SessionError};
use crate::negotiation::{negotiate, pick_local_port, Negotiated};

/// Receives every push-kind request the robot sends.
pub type PushHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// How many local ports `open` tries before giving up on bind failures.
const LOCAL_PORT_ATTEMPTS: usize = 5;

/// Lifecycle of a session. A session is opened at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Negotiating,
    Open,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => f.write_str("closed"),
            SessionState::Negotiating => f.write_str("negotiating"),
            SessionState::Open => f.write_str("open"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One control connection to one robot.
///
/// `open` negotiates the SDK connection and starts two worker threads: a
/// receive loop that matches responses to outstanding requests and a
/// keepalive loop that sends a heartbeat every `keepalive_interval`. Both
/// stop on `close`, on drop, or when the robot goes away.
pub struct Session {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    config: SessionConfig,
    registry: &'static CommandRegistry,
    sequence: SequenceAllocator,
    correlations: CorrelationTable,
    state: Mutex<SessionState>,
    started: AtomicBool,
    closing: AtomicBool,
    writer: Mutex<Option<FrameWriter<ControlStream>>>,
    control: Mutex<Option<ControlStream>>,
    push_handler: RwLock<Option<PushHandler>>,
    keepalive_stop: Mutex<Option<mpsc::Sender<()>>>,
    negotiated: Mutex<Option<Negotiated>>,
}

impl Session {
    /// Create a closed session. Builds the command registry if needed.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let sequence = SequenceAllocator::with_window(config.sequence_window.clone()).ok_or_else(
            || SessionError::InvalidConfig(format!("sequence window {:?}", config.sequence_window)),
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                registry: register_all(),
                sequence,
                correlations: CorrelationTable::new(),
                state: Mutex::new(SessionState::Closed),
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                writer: Mutex::new(None),
                control: Mutex::new(None),
                push_handler: RwLock::new(None),
                keepalive_stop: Mutex::new(None),
                negotiated: Mutex::new(None),
            }),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Create and open a session in one step.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        let session = Self::new(config)?;
        session.open()?;
        Ok(session)
    }

    /// Negotiate, open the control connection and start the worker threads.
    ///
    /// Fails with `AlreadyOpen` on every call after the first, including after
    /// `close`.
    pub fn open(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyOpen);
        }
        self.inner.set_state(SessionState::Negotiating);

        if let Err(err) = self.establish() {
            error!(%err, robot = %self.inner.config.robot_ip, "failed to open session");
            self.inner.shutdown("open failed");
            self.join_workers();
            return Err(err);
        }

        if self.inner.config.enter_sdk_mode {
            if let Err(err) = self.call(&SetSdkMode { enable: true }) {
                error!(%err, "robot refused sdk mode");
                self.inner.shutdown("sdk mode refused");
                self.join_workers();
                return Err(err);
            }
        }
        Ok(())
    }

    fn establish(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut last_err = None;

        for _ in 0..LOCAL_PORT_ATTEMPTS {
            let port = pick_local_port(&config.local_port_range);
            let negotiated = negotiate(config, &self.inner.sequence, port)?;
            let local = SocketAddr::new(config.local_ip, port);

            match ControlStream::connect(
                config.transport,
                local,
                config.control_addr(),
                Some(config.connect_timeout),
            ) {
                Ok(stream) => return self.start(stream, negotiated),
                Err(err @ TransportError::Bind { .. }) => {
                    warn!(%err, port, "local port unavailable, renegotiating");
                    last_err = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(last_err
            .map(SessionError::from)
            .unwrap_or_else(|| SessionError::NegotiationFailed("no local port".to_string())))
    }

    fn start(&self, stream: ControlStream, negotiated: Negotiated) -> Result<()> {
        let config = &self.inner.config;
        let frame_config = FrameConfig {
            read_timeout: Some(config.poll_interval),
            write_timeout: config.write_timeout,
        };

        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        let shutdown_handle = stream.try_clone()?;
        let reader = FrameReader::with_config_stream(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::with_config_stream(stream, frame_config)?;

        *lock(&self.inner.writer) = Some(writer);
        *lock(&self.inner.control) = Some(shutdown_handle);
        *lock(&self.inner.negotiated) = Some(negotiated);
        self.inner.set_state(SessionState::Open);

        let (stop_tx, stop_rx) = mpsc::channel();
        *lock(&self.inner.keepalive_stop) = Some(stop_tx);

        let mut workers = lock(&self.workers);
        let inner = Arc::clone(&self.inner);
        workers.push(
            thread::Builder::new()
                .name("rmlink-recv".to_string())
                .spawn(move || receive_loop(inner, reader))
                .map_err(TransportError::Io)?,
        );
        let inner = Arc::clone(&self.inner);
        workers.push(
            thread::Builder::new()
                .name("rmlink-keepalive".to_string())
                .spawn(move || keepalive_loop(inner, stop_rx))
                .map_err(TransportError::Io)?,
        );

        info!(
            %local,
            %remote,
            transport = %config.transport,
            mode = %config.mode,
            "session open"
        );
        Ok(())
    }

    /// Write a frame, optionally registering a continuation for its response.
    ///
    /// The continuation is registered before the write and fires exactly
    /// once: with the response, or with `Cancelled` when the session closes.
    /// If the write fails it is withdrawn without firing.
    pub fn send(&self, frame: Frame, callback: Option<Callback>) -> Result<()> {
        if self.inner.state() != SessionState::Open {
            return Err(SessionError::NotOpen);
        }

        let key = match callback {
            Some(callback) => {
                let key = CorrelationKey::for_request(&frame);
                self.inner.correlations.insert(key, callback)?;
                Some(key)
            }
            None => None,
        };

        if let Err(err) = self.inner.write(&frame) {
            if let Some(key) = key {
                drop(self.inner.correlations.take(&key));
            }
            return Err(err);
        }
        Ok(())
    }

    /// Send a frame and block until its response arrives or the session
    /// closes.
    pub fn send_sync(&self, frame: Frame) -> Result<Message> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(
            frame,
            Some(Box::new(move |result| {
                let _ = tx.try_send(result);
            })),
        )?;
        rx.recv().unwrap_or(Err(SessionError::Cancelled))
    }

    /// Like [`send_sync`](Self::send_sync), but gives up after `timeout` and
    /// withdraws the pending request.
    pub fn send_sync_timeout(&self, frame: Frame, timeout: Duration) -> Result<Message> {
        let key = CorrelationKey::for_request(&frame);
        let (tx, rx) = mpsc::sync_channel(1);
        self.send(
            frame,
            Some(Box::new(move |result| {
                let _ = tx.try_send(result);
            })),
        )?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if self.inner.correlations.take(&key).is_some() {
                    debug!(seq = key.seq, set = key.set, id = key.id, "request timed out");
                    return Err(SessionError::Timeout(timeout));
                }
                // The response won the race against the withdrawal.
                rx.recv().unwrap_or(Err(SessionError::Cancelled))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Cancelled),
        }
    }

    /// Build a request frame for `command` with a fresh sequence id.
    pub fn request<C: Command + ?Sized>(&self, command: &C) -> Frame {
        self.inner.request(command)
    }

    /// Send `command`, wait up to `command_timeout`, and fail with `Rejected`
    /// unless the response carries a zero return code.
    pub fn call<C: Command + ?Sized>(&self, command: &C) -> Result<Message> {
        let message =
            self.send_sync_timeout(self.request(command), self.inner.config.command_timeout)?;
        match message.command().retcode() {
            Some(retcode) if retcode != 0 => Err(SessionError::Rejected {
                command: command.name(),
                retcode,
            }),
            _ => Ok(message),
        }
    }

    /// Install the handler for robot pushes, returning the previous one.
    ///
    /// The handler runs on the receive thread. Blocking there on `send_sync`
    /// or `call` deadlocks, because that thread delivers the reply.
    pub fn set_push_handler(&self, handler: Option<PushHandler>) -> Option<PushHandler> {
        let mut slot = self
            .inner
            .push_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, handler)
    }

    /// Close the session. Idempotent.
    ///
    /// Leaves SDK mode when configured to, stops both worker threads and fails
    /// every outstanding request with `Cancelled`.
    pub fn close(&self) -> Result<()> {
        if self.inner.state() == SessionState::Open
            && self.inner.config.enter_sdk_mode
            && !self.inner.closing.load(Ordering::SeqCst)
        {
            if let Err(err) = self.call(&SetSdkMode { enable: false }) {
                warn!(%err, "failed to leave sdk mode");
            }
        }
        self.inner.shutdown("closed by caller");
        self.join_workers();
        Ok(())
    }

    fn join_workers(&self) {
        let current = thread::current().id();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("session worker panicked");
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Negotiation outcome, once the session has opened.
    pub fn negotiated(&self) -> Option<Negotiated> {
        *lock(&self.inner.negotiated)
    }

    /// Number of requests still awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.inner.correlations.len()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("robot", &self.inner.config.robot_ip)
            .field("transport", &self.inner.config.transport)
            .field("state", &self.inner.state())
            .field("outstanding", &self.inner.correlations.len())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!(from = %*current, to = %state, "session state");
            *current = state;
        }
    }

    fn request<C: Command + ?Sized>(&self, command: &C) -> Frame {
        Frame::request(
            self.config.client_addr.as_byte(),
            self.config.robot_addr.as_byte(),
            self.sequence.next(),
            true,
            command.set(),
            command.id(),
            command.payload(),
        )
    }

    fn write(&self, frame: &Frame) -> Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(SessionError::NotOpen)?;
        writer.write_frame(frame).map_err(|err| match err {
            FrameError::Io(io) => SessionError::Transport(TransportError::Io(io)),
            other => SessionError::Frame(other),
        })?;
        trace!(
            seq = frame.seq,
            set = frame.cmd_set,
            id = frame.cmd_id,
            bytes = frame.wire_size(),
            "sent frame"
        );
        Ok(())
    }

    /// Stop everything once; later calls are no-ops.
    fn shutdown(&self, reason: &str) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.keepalive_stop).take();
        if let Some(control) = lock(&self.control).take() {
            if let Err(err) = control.shutdown() {
                debug!(%err, "control shutdown failed");
            }
        }
        lock(&self.writer).take();
        self.set_state(SessionState::Closed);
        let cancelled = self.correlations.drain();
        info!(reason, cancelled, "session closed");
    }

    fn dispatch(&self, frame: Frame) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        trace!(
            sender = frame.sender,
            seq = frame.seq,
            set = frame.cmd_set,
            id = frame.cmd_id,
            response = frame.is_response,
            "received frame"
        );

        if frame.is_response {
            let key = CorrelationKey::for_response(&frame);
            match self.correlations.take(&key) {
                Some(callback) => {
                    let result = self.registry.decode(frame).map_err(SessionError::from);
                    if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
                        error!(seq = key.seq, "response callback panicked");
                    }
                }
                None => debug!(seq = key.seq, set = key.set, id = key.id, "dropping unsolicited response"),
            }
            return;
        }

        match self
            .registry
            .kind_of(frame.cmd_set, frame.cmd_id, Direction::Request)
        {
            Some(CommandKind::Push) => self.dispatch_push(frame),
            Some(CommandKind::Pull) => {
                debug!(set = frame.cmd_set, id = frame.cmd_id, "ignoring request from robot");
            }
            None => {
                warn!(set = frame.cmd_set, id = frame.cmd_id, "dropping unknown command");
            }
        }
    }

    fn dispatch_push(&self, frame: Frame) {
        let handler = self
            .push_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(handler) = handler else {
            debug!(set = frame.cmd_set, id = frame.cmd_id, "no push handler installed");
            return;
        };

        match self.registry.decode(frame) {
            Ok(message) => {
                if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
                    error!("push handler panicked");
                }
            }
            Err(err) => warn!(%err, "dropping undecodable push"),
        }
    }
}

fn receive_loop(inner: Arc<Inner>, mut reader: FrameReader<ControlStream>) {
    let reason = loop {
        if inner.closing.load(Ordering::SeqCst) {
            break "closed by caller";
        }
        match reader.read_frame() {
            Ok(frame) => inner.dispatch(frame),
            Err(err) if err.is_timeout() => continue,
            Err(FrameError::ConnectionClosed) => break "connection closed by robot",
            Err(err) => {
                if !inner.closing.load(Ordering::SeqCst) {
                    error!(%err, "control connection failed");
                }
                break "transport error";
            }
        }
    };
    if reader.rejected_frames() > 0 {
        warn!(rejected = reader.rejected_frames(), "corrupt frames dropped during session");
    }
    inner.shutdown(reason);
}

fn keepalive_loop(inner: Arc<Inner>, stop: mpsc::Receiver<()>) {
    let interval = inner.config.keepalive_interval;
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        let frame = inner.request(&SdkHeartbeat);
        match inner.write(&frame) {
            Ok(()) => trace!(seq = frame.seq, "sent heartbeat"),
            Err(err) if err.is_closed() => break,
            Err(err) => warn!(%err, "heartbeat failed"),
        }
    }
    debug!("keepalive stopped");
}
