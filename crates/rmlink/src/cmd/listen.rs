use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

use rmlink_notify::{Channel, EventCode, Multiplexer, TextControl, TextPlane, TextPlaneConfig};
use tracing::{debug, info};

use crate::cmd::{parse_timeout, ListenArgs};
use crate::exit::{notify_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_notification, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let [module, plane, attribute] = <[String; 3]>::try_from(args.stream)
        .map_err(|_| CliError::new(USAGE, "expected MODULE PLANE ATTRIBUTE"))?;
    let channel = match plane.as_str() {
        "push" => Channel::Push,
        "event" => Channel::Event,
        other => {
            return Err(CliError::new(
                USAGE,
                format!("unknown plane '{other}' (expected push or event)"),
            ))
        }
    };
    let kind = format!("{module} {plane}");

    let config = TextPlaneConfig {
        control_port: args.control_port,
        push_port: args.push_port,
        event_port: args.event_port,
        timeout: parse_timeout(&args.timeout)?,
        ..TextPlaneConfig::for_robot(args.robot)
    };

    let control = TextControl::open(&config).map_err(|err| notify_error("connect failed", err))?;
    let control = Arc::new(Mutex::new(control));

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let code = EventCode::lookup(&kind, &attribute).map(EventCode::as_u64);
    let (tx, rx) = mpsc::channel::<String>();
    let multiplexer = Multiplexer::new(TextPlane::new(Arc::clone(&control), config, channel));
    let token = multiplexer
        .subscribe(
            kind.clone(),
            attribute.clone(),
            args.params.as_deref(),
            move |payload: &String| {
                let _ = tx.send(payload.clone());
            },
        )
        .map_err(|err| notify_error("subscribe failed", err))?;
    info!(%kind, %attribute, %channel, "listening");

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let payload = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(payload) => payload,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        print_notification(&kind, &attribute, code, &payload, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    let outcome = multiplexer.unsubscribe(&kind, &attribute, token);
    drop(multiplexer);
    if let Ok(control) = Arc::try_unwrap(control) {
        let control = control.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = control.close() {
            debug!(%err, "quit failed");
        }
    }
    outcome.map_err(|err| notify_error("unsubscribe failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
