use rmlink_command::{GetVersion, GetVersionResponse};
use rmlink_session::Session;
use tracing::warn;

use crate::cmd::{parse_timeout, InfoArgs};
use crate::exit::{session_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_info, InfoOutput, OutputFormat};

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let config = args.robot.session_config(timeout);

    let session = Session::connect(config).map_err(|err| session_error("connect failed", err))?;
    let negotiated = session
        .negotiated()
        .ok_or_else(|| CliError::new(crate::exit::INTERNAL, "session opened without negotiation"))?;

    let reply = session
        .call(&GetVersion)
        .map_err(|err| session_error("version query failed", err))?;
    let version = reply
        .downcast_ref::<GetVersionResponse>()
        .ok_or_else(|| CliError::new(DATA_INVALID, "unexpected reply to version query"))?;

    let out = InfoOutput {
        robot: args.robot.robot.to_string(),
        transport: args.robot.transport.to_string(),
        mode: args.robot.mode.to_string(),
        local_port: negotiated.local_port,
        client_ip: negotiated.client_ip.to_string(),
        firmware: version.version_string(),
        connected: session.is_open(),
    };

    if let Err(err) = session.close() {
        warn!(%err, "close failed");
    }
    print_info(&out, format);
    Ok(SUCCESS)
}
