use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

#[derive(Serialize)]
pub struct RobotRow {
    pub source: String,
    /// Announced IP address or serial number.
    pub id: String,
}

#[derive(Serialize)]
struct DiscoverOutput<'a> {
    plane: &'a str,
    robots: &'a [RobotRow],
}

pub fn print_robots(plane: &str, robots: &[RobotRow], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&DiscoverOutput { plane, robots }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SOURCE", "ROBOT"]);
            for robot in robots {
                table.add_row(vec![robot.source.clone(), robot.id.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if robots.is_empty() {
                println!("no robots announced on the {plane} plane");
            }
            for robot in robots {
                println!("robot={} source={}", robot.id, robot.source);
            }
        }
    }
}

#[derive(Serialize)]
pub struct InfoOutput {
    pub robot: String,
    pub transport: String,
    pub mode: String,
    pub local_port: u16,
    pub client_ip: String,
    pub firmware: String,
    pub connected: bool,
}

pub fn print_info(out: &InfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"])
                .add_row(vec!["Robot", out.robot.as_str()])
                .add_row(vec!["Transport", out.transport.as_str()])
                .add_row(vec!["Mode", out.mode.as_str()])
                .add_row(vec!["Local port", out.local_port.to_string().as_str()])
                .add_row(vec!["Client IP", out.client_ip.as_str()])
                .add_row(vec!["Firmware", out.firmware.as_str()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Robot Info:");
            println!("  Robot:      {}", out.robot);
            println!("  Transport:  {}", out.transport);
            println!("  Mode:       {}", out.mode);
            println!("  Local port: {}", out.local_port);
            println!("  Client IP:  {}", out.client_ip);
            println!("  Firmware:   {}", out.firmware);
        }
    }
}

#[derive(Serialize)]
struct NotificationOutput<'a> {
    kind: &'a str,
    attribute: &'a str,
    code: Option<u64>,
    payload: &'a str,
    timestamp: String,
}

pub fn print_notification(
    kind: &str,
    attribute: &str,
    code: Option<u64>,
    payload: &str,
    format: OutputFormat,
) {
    match format {
        OutputFormat::Json => print_json(&NotificationOutput {
            kind,
            attribute,
            code,
            payload,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "ATTRIBUTE", "PAYLOAD"])
                .add_row(vec![kind, attribute, payload]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{kind} {attribute}: {payload}"),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
