use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry};

use crate::exit::{io_error, CliResult};

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Where one band of log levels is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogSink {
    Stderr,
    Stdout,
    Discard,
    File(PathBuf),
}

impl FromStr for LogSink {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "stderr" | "-" => LogSink::Stderr,
            "stdout" => LogSink::Stdout,
            "discard" | "none" | "off" => LogSink::Discard,
            path => LogSink::File(PathBuf::from(path)),
        })
    }
}

/// The level bands that can be routed separately.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Band {
    /// `trace` and `debug`.
    Trace,
    Info,
    Warn,
    Error,
}

impl Band {
    fn contains(self, level: &Level) -> bool {
        match self {
            Band::Trace => *level == Level::TRACE || *level == Level::DEBUG,
            Band::Info => *level == Level::INFO,
            Band::Warn => *level == Level::WARN,
            Band::Error => *level == Level::ERROR,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    pub trace: LogSink,
    pub info: LogSink,
    pub warn: LogSink,
    pub error: LogSink,
}

fn make_writer(sink: &LogSink) -> CliResult<Option<BoxMakeWriter>> {
    let writer = match sink {
        LogSink::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogSink::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogSink::Discard => return Ok(None),
        LogSink::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| io_error(&format!("cannot open log file {}", path.display()), err))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };
    Ok(Some(writer))
}

fn band_layer<S>(
    format: LogFormat,
    max: LevelFilter,
    band: Band,
    sink: &LogSink,
) -> CliResult<Option<Box<dyn Layer<S> + Send + Sync>>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(writer) = make_writer(sink)? else {
        return Ok(None);
    };
    let filter = filter_fn(move |meta| band.contains(meta.level()) && *meta.level() <= max);
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false);
    let layer = match format {
        LogFormat::Text => layer.with_filter(filter).boxed(),
        LogFormat::Json => layer.json().with_filter(filter).boxed(),
    };
    Ok(Some(layer))
}

/// Install the global subscriber, one layer per level band.
///
/// Returns `false` when a subscriber was already installed; the existing one
/// stays in place.
pub fn init_logging(config: &LogConfig) -> CliResult<bool> {
    let max = config.level.as_filter();
    let bands = [
        (Band::Trace, &config.trace),
        (Band::Info, &config.info),
        (Band::Warn, &config.warn),
        (Band::Error, &config.error),
    ];

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for (band, sink) in bands {
        if let Some(layer) = band_layer(config.format, max, band, sink)? {
            layers.push(layer);
        }
    }

    if let Err(err) = tracing_subscriber::registry().with(layers).try_init() {
        tracing::debug!(%err, "global subscriber already installed");
        return Ok(false);
    }
    Ok(true)
}
