use std::net::{Ipv4Addr, SocketAddr};

use rmlink_transport::{
    discover, parse_serial_announcement, parse_text_announcement, Decision, Discovered,
    DiscoveryConfig,
};
use tracing::info;

use crate::cmd::{parse_timeout, DiscoverArgs};
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_robots, OutputFormat, RobotRow};

pub fn run(args: DiscoverArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let mut config = if args.text {
        DiscoveryConfig::text(timeout)
    } else {
        DiscoveryConfig::binary(timeout)
    };
    if let Some(port) = args.port {
        config.listen = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    }

    let plane = if args.text { "text" } else { "binary" };
    let robots = if args.text {
        collect(&config, parse_text_announcement, args.count, |ip| ip.to_string())?
    } else {
        collect(&config, parse_serial_announcement, args.count, |serial| {
            String::from_utf8_lossy(serial).into_owned()
        })?
    };

    info!(plane, found = robots.len(), "discovery finished");
    print_robots(plane, &robots, format);
    Ok(SUCCESS)
}

fn collect<T, P>(
    config: &DiscoveryConfig,
    parse: P,
    count: Option<usize>,
    describe: impl Fn(&T) -> String,
) -> CliResult<Vec<RobotRow>>
where
    T: PartialEq,
    P: FnMut(&[u8], SocketAddr) -> Option<T>,
{
    let mut seen: Vec<Discovered<T>> = Vec::new();
    let mut rows = Vec::new();
    let limit = count.unwrap_or(usize::MAX);

    let found = discover(config, parse, |_| Decision::ACCEPT)
        .map_err(|err| transport_error("discovery failed", err))?;

    for candidate in found {
        let candidate = candidate.map_err(|err| transport_error("discovery failed", err))?;
        if seen.contains(&candidate) {
            continue;
        }
        rows.push(RobotRow {
            source: candidate.source.to_string(),
            id: describe(&candidate.value),
        });
        seen.push(candidate);
        if rows.len() >= limit {
            break;
        }
    }
    Ok(rows)
}
