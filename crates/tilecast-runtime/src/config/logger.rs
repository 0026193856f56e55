use core::fmt::Display;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Configuration for one logging concern, parameterized by its level type.
///
/// Several sinks may be active at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false).
    /// Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional routing through the `log` crate at the given level.
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this logger, determining verbosity.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in [LoggerConfig].
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Levels for routing through the `log` crate.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

/// Verbosity of the profiling output.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProfilingLogLevel {
    /// No profiling output.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Per-run summary table of modeled cycles.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for ProfilingLogLevel {}

/// Materialized sinks for one [LoggerConfig].
#[derive(Debug, Default)]
pub struct Logger {
    sinks: Vec<LoggerKind>,
}

impl Logger {
    /// Open every sink the config enables.
    pub fn new<L: LogLevel>(config: &LoggerConfig<L>) -> Self {
        let mut sinks = Vec::new();
        if let Some(file) = &config.file {
            sinks.push(LoggerKind::File(FileLogger::new(file, config.append)));
        }
        if config.stdout {
            sinks.push(LoggerKind::Stdout);
        }
        if config.stderr {
            sinks.push(LoggerKind::Stderr);
        }
        if let Some(level) = config.log {
            sinks.push(LoggerKind::Log(level));
        }
        Self { sinks }
    }

    /// Whether any sink is active.
    pub fn is_active(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Write one message to every active sink.
    pub fn log<S: Display>(&mut self, msg: &S) {
        match self.sinks.len() {
            0 => {}
            1 => self.sinks[0].log(msg),
            _ => {
                let msg = msg.to_string();
                for sink in self.sinks.iter_mut() {
                    sink.log(&msg);
                }
            }
        }
    }
}

#[derive(Debug)]
enum LoggerKind {
    File(FileLogger),
    Stdout,
    Stderr,
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

/// Logger that writes messages to a file.
#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    fn new(path: &PathBuf, append: bool) -> Self {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .create(true)
            .open(path)
            .unwrap();

        Self {
            writer: BufWriter::new(file),
        }
    }

    fn log<S: Display>(&mut self, msg: &S) {
        writeln!(self.writer, "{msg}").expect("Should be able to log debug information.");
        self.writer.flush().expect("Can complete write operation.");
    }
}
