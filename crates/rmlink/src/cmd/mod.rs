use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use clap::{Args, Subcommand};
use rmlink_command::ConnectionMode;
use rmlink_session::{SessionConfig, CONTROL_PORT, DEFAULT_ROBOT_IP, PROXY_PORT};
use rmlink_transport::TransportKind;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod discover;
pub mod info;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for robot announcements.
    Discover(DiscoverArgs),
    /// Open an SDK session and print connection details.
    Info(InfoArgs),
    /// Subscribe to a text plane stream and print notifications.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Discover(args) => discover::run(args, format),
        Command::Info(args) => info::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Listen for text plane announcements instead of binary ones.
    #[arg(long)]
    pub text: bool,
    /// Override the announcement port.
    #[arg(long)]
    pub port: Option<u16>,
    /// How long to listen (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Stop after N robots.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct RobotArgs {
    /// Robot IP address.
    #[arg(long, env = "RMLINK_ROBOT", default_value_t = IpAddr::V4(DEFAULT_ROBOT_IP))]
    pub robot: IpAddr,
    /// Network topology: ap, sta or rndis.
    #[arg(long, env = "RMLINK_MODE", default_value = "ap")]
    pub mode: ConnectionMode,
    /// Control connection transport: tcp or udp.
    #[arg(long, env = "RMLINK_TRANSPORT", default_value = "tcp")]
    pub transport: TransportKind,
    /// Local address to open the control connection from.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub local_ip: IpAddr,
    /// Robot port for the connection request.
    #[arg(long, default_value_t = PROXY_PORT)]
    pub proxy_port: u16,
    /// Robot port for the control connection.
    #[arg(long, default_value_t = CONTROL_PORT)]
    pub control_port: u16,
}

impl RobotArgs {
    pub fn session_config(&self, timeout: Duration) -> SessionConfig {
        SessionConfig {
            robot_ip: self.robot,
            proxy_port: self.proxy_port,
            control_port: self.control_port,
            mode: self.mode,
            transport: self.transport,
            local_ip: self.local_ip,
            negotiation_timeout: timeout,
            connect_timeout: timeout,
            command_timeout: timeout,
            ..SessionConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub robot: RobotArgs,
    /// Per-step timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Stream to subscribe to, e.g. `gimbal push attitude`.
    #[arg(num_args = 3, value_names = ["MODULE", "PLANE", "ATTRIBUTE"], required = true)]
    pub stream: Vec<String>,
    /// Parameters for the "on" command, e.g. `freq 10`.
    #[arg(long)]
    pub params: Option<String>,
    /// Robot IP address.
    #[arg(long, env = "RMLINK_ROBOT", default_value_t = IpAddr::V4(DEFAULT_ROBOT_IP))]
    pub robot: IpAddr,
    /// Robot port for text commands.
    #[arg(long, default_value_t = rmlink_notify::text::CONTROL_PORT)]
    pub control_port: u16,
    /// Local port pushes arrive on.
    #[arg(long, default_value_t = rmlink_notify::text::PUSH_PORT)]
    pub push_port: u16,
    /// Robot port for the event stream.
    #[arg(long, default_value_t = rmlink_notify::text::EVENT_PORT)]
    pub event_port: u16,
    /// Connect and reply timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Exit after N notifications.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timeout_units() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_timeout_invalid() {
        assert_eq!(parse_timeout("0s").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout("bad").unwrap_err().code, USAGE);
        assert_eq!(parse_timeout(" ").unwrap_err().code, USAGE);
    }

    #[test]
    fn robot_args_shape_session() {
        let args = RobotArgs {
            robot: "10.0.0.5".parse().unwrap(),
            mode: ConnectionMode::Infrastructure,
            transport: TransportKind::Datagram,
            local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            proxy_port: PROXY_PORT,
            control_port: CONTROL_PORT,
        };
        let config = args.session_config(Duration::from_millis(700));
        assert_eq!(config.control_addr(), "10.0.0.5:20020".parse().unwrap());
        assert_eq!(config.transport, TransportKind::Datagram);
        assert_eq!(config.command_timeout, Duration::from_millis(700));
        config.validate().unwrap();
    }
}
