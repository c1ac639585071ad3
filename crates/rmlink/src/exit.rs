use std::fmt;
use std::io;

use rmlink_command::CommandError;
use rmlink_frame::FrameError;
use rmlink_notify::NotifyError;
use rmlink_session::SessionError;
use rmlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::AddrInUse
        | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::UnknownTransport(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn command_error(context: &str, err: CommandError) -> CliError {
    match err {
        CommandError::UnknownConnectionMode(_) => CliError::new(USAGE, format!("{context}: {err}")),
        CommandError::DuplicateCommand { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Frame(err) => frame_error(context, err),
        SessionError::Command(err) => command_error(context, err),
        SessionError::Timeout(_) | SessionError::NegotiationFailed(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        SessionError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SessionError::DuplicateCorrelation { .. } => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn notify_error(context: &str, err: NotifyError) -> CliError {
    match err {
        NotifyError::Session(err) => session_error(context, err),
        NotifyError::Transport(err) => transport_error(context, err),
        NotifyError::Io(err) => io_error(context, err),
        NotifyError::Protocol(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        NotifyError::UpstreamRejected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = session_error("info", SessionError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
        let err = session_error("info", SessionError::NegotiationFailed("silent".into()));
        assert_eq!(err.code, TIMEOUT);
        let io = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(notify_error("listen", NotifyError::Io(io)).code, TIMEOUT);
        let err = notify_error(
            "subscribe failed",
            NotifyError::Session(SessionError::Timeout(Duration::from_secs(2))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn transport_errors_map_by_cause() {
        let err = transport_error("connect", TransportError::UnknownTransport("smoke".into()));
        assert_eq!(err.code, USAGE);
        let unreachable = io::Error::new(io::ErrorKind::AddrNotAvailable, "no route");
        let err = transport_error("connect", TransportError::Io(unreachable));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(
            notify_error("subscribe failed", NotifyError::UpstreamRejected("error;".into())).code,
            FAILURE
        );
    }

    #[test]
    fn nested_errors_keep_their_class() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = session_error(
            "info",
            SessionError::Transport(TransportError::Io(refused)),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("info: "));

        let err = notify_error(
            "listen",
            NotifyError::Session(SessionError::Frame(FrameError::BadLength(3))),
        );
        assert_eq!(err.code, DATA_INVALID);

        let err = session_error(
            "info",
            SessionError::Rejected {
                command: "get_version",
                retcode: 1,
            },
        );
        assert_eq!(err.code, FAILURE);
    }
}
