#![cfg(feature = "cli")]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, UdpSocket};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use rmlink_session::mock::{MockOptions, MockRobot};

fn rmlink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_rmlink"));
    command
        .env_remove("RMLINK_ROBOT")
        .env_remove("RMLINK_MODE")
        .env_remove("RMLINK_TRANSPORT")
        .arg("--log-level")
        .arg("error");
    command
}

#[test]
fn info_against_mock_robot_reports_firmware() {
    let robot = MockRobot::start(MockOptions::default()).expect("mock robot should start");
    let config = robot.session_config();

    let output = rmlink()
        .arg("--format")
        .arg("json")
        .arg("info")
        .arg("--robot")
        .arg(config.robot_ip.to_string())
        .arg("--local-ip")
        .arg(config.local_ip.to_string())
        .arg("--proxy-port")
        .arg(config.proxy_port.to_string())
        .arg("--control-port")
        .arg(config.control_port.to_string())
        .arg("--timeout")
        .arg("2s")
        .output()
        .expect("info should run");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("info should emit json");
    assert_eq!(payload["firmware"], "01.02.03.04");
    assert_eq!(payload["client_ip"], "127.0.0.1");
    assert_eq!(payload["connected"], true);
    assert_eq!(robot.negotiations().len(), 1);
}

#[test]
fn info_without_robot_times_out_with_124() {
    let silent = UdpSocket::bind("127.0.0.1:0").expect("bind should work");
    let port = silent.local_addr().expect("local addr").port();

    let output = rmlink()
        .arg("info")
        .arg("--robot")
        .arg("127.0.0.1")
        .arg("--proxy-port")
        .arg(port.to_string())
        .arg("--timeout")
        .arg("100ms")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn invalid_timeout_is_usage_error() {
    let output = rmlink()
        .arg("info")
        .arg("--timeout")
        .arg("0s")
        .output()
        .expect("info should run");

    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn discover_with_no_announcements_is_empty() {
    let output = rmlink()
        .arg("--format")
        .arg("json")
        .arg("discover")
        .arg("--text")
        .arg("--port")
        .arg("0")
        .arg("--timeout")
        .arg("200ms")
        .output()
        .expect("discover should run");

    assert!(output.status.success());
    let payload: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("discover should emit json");
    assert_eq!(payload["plane"], "text");
    assert_eq!(payload["robots"].as_array().map(Vec::len), Some(0));
}

#[test]
fn listen_prints_text_pushes() {
    let control = TcpListener::bind("127.0.0.1:0").expect("bind should work");
    let control_port = control.local_addr().expect("local addr").port();
    let robot = thread::spawn(move || {
        let (stream, _) = control.accept().expect("cli should connect");
        let mut writer = stream.try_clone().expect("clone");
        let mut reader = BufReader::new(stream);
        let mut commands = Vec::new();
        loop {
            let mut command = Vec::new();
            match reader.read_until(b';', &mut command) {
                Ok(0) | Err(_) => return commands,
                Ok(_) => {}
            }
            let command = String::from_utf8_lossy(&command).into_owned();
            commands.push(command.clone());
            if command == "quit;" {
                return commands;
            }
            writer.write_all(b"ok;").expect("reply");
        }
    });

    let push_port = {
        let probe = UdpSocket::bind("127.0.0.1:0").expect("bind should work");
        probe.local_addr().expect("local addr").port()
    };

    let mut child = rmlink()
        .arg("--format")
        .arg("json")
        .arg("listen")
        .arg("gimbal")
        .arg("push")
        .arg("attitude")
        .arg("--params")
        .arg("freq 10")
        .arg("--robot")
        .arg("127.0.0.1")
        .arg("--control-port")
        .arg(control_port.to_string())
        .arg("--push-port")
        .arg(push_port.to_string())
        .arg("--count")
        .arg("1")
        .stdout(Stdio::piped())
        .spawn()
        .expect("listen should start");

    let sender = UdpSocket::bind("127.0.0.1:0").expect("bind should work");
    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().expect("child status") {
            break status;
        }
        if start.elapsed() > Duration::from_secs(10) {
            let _ = child.kill();
            panic!("listen did not exit");
        }
        let _ = sender.send_to(b"gimbal push attitude 1.0 2.0;", ("127.0.0.1", push_port));
        thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success());

    let mut stdout = String::new();
    std::io::Read::read_to_string(
        child.stdout.as_mut().expect("stdout piped"),
        &mut stdout,
    )
    .expect("read stdout");
    let line: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("one notification"))
            .expect("notification should be json");
    assert_eq!(line["payload"], "1.0 2.0");
    assert_eq!(line["code"], (2u64 << 32) | 1);

    let commands = robot.join().expect("robot thread");
    assert_eq!(
        commands,
        vec![
            "command;",
            "gimbal push attitude on freq 10;",
            "gimbal push attitude off;",
            "quit;",
        ]
    );
}

#[test]
fn version_reports_package_version() {
    let output = rmlink()
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("rmlink {}", env!("CARGO_PKG_VERSION")));
}
