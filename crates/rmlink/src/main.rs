mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel, LogSink};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "rmlink", version, about = "RoboMaster robot SDK client")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Sink for trace and debug events: stderr, stdout, discard or a file path.
    #[arg(long, value_name = "SINK", default_value = "stderr", global = true)]
    trace_log: LogSink,

    /// Sink for info events.
    #[arg(long, value_name = "SINK", default_value = "stderr", global = true)]
    info_log: LogSink,

    /// Sink for warnings.
    #[arg(long, value_name = "SINK", default_value = "stderr", global = true)]
    warn_log: LogSink,

    /// Sink for errors.
    #[arg(long, value_name = "SINK", default_value = "stderr", global = true)]
    error_log: LogSink,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            level: self.log_level,
            trace: self.trace_log.clone(),
            info: self.info_log.clone(),
            warn: self.warn_log.clone(),
            error: self.error_log.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log_config()) {
        eprintln!("error: {err}");
        std::process::exit(err.code);
    }

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
