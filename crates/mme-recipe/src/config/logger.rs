use super::{GlobalConfig, planner::RecipeLogLevel};
use alloc::{string::ToString, sync::Arc, vec::Vec};
use core::fmt::Display;
use hashbrown::HashMap;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
};

/// Configuration for logging recipes, parameterized by a log level type.
///
/// Note that you can use multiple loggers at the same time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional crate-level logging configuration (e.g., info, debug, trace).
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

/// Log levels using the `log` crate.
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

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Fans recipe descriptions out to every configured sink.
#[derive(Debug)]
pub struct Logger {
    loggers: Vec<LoggerKind>,
    level: RecipeLogLevel,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a new `Logger` from the global configuration.
    ///
    /// Note that creating a logger opens its files.
    pub fn new() -> Self {
        let config: Arc<GlobalConfig> = GlobalConfig::get();
        Self::from_config(&config.logger)
    }

    /// Creates a logger writing to the sinks of `config`, each sink opened once.
    pub fn from_config(config: &LoggerConfig<RecipeLogLevel>) -> Self {
        #[derive(Hash, PartialEq, Eq)]
        enum LoggerId {
            File(PathBuf),
            Stdout,
            Stderr,
            LogCrate(LogCrateLevel),
        }

        let mut loggers = Vec::new();
        let mut logger2index = HashMap::<LoggerId, usize>::new();
        let mut register = |id: LoggerId, logger: &dyn Fn() -> Option<LoggerKind>| {
            if logger2index.contains_key(&id) {
                return;
            }
            if let Some(logger) = logger() {
                logger2index.insert(id, loggers.len());
                loggers.push(logger);
            }
        };

        if config.level != RecipeLogLevel::Disabled {
            if let Some(file) = &config.file {
                register(LoggerId::File(file.clone()), &|| {
                    FileLogger::new(file, config.append).map(LoggerKind::File)
                });
            }
            if config.stdout {
                register(LoggerId::Stdout, &|| Some(LoggerKind::Stdout));
            }
            if config.stderr {
                register(LoggerId::Stderr, &|| Some(LoggerKind::Stderr));
            }
            if let Some(level) = config.log {
                register(LoggerId::LogCrate(level), &|| Some(LoggerKind::Log(level)));
            }
        }

        Self {
            loggers,
            level: config.level,
        }
    }

    /// Logs a recipe description, directing it to all configured loggers.
    pub fn log_recipe<S: Display>(&mut self, msg: &S) {
        match self.loggers.len() {
            0 => {}
            1 => self.loggers[0].log(msg),
            _ => {
                let msg = msg.to_string();
                for logger in self.loggers.iter_mut() {
                    logger.log(&msg);
                }
            }
        }
    }

    /// Returns the configured recipe log level.
    pub fn log_level(&self) -> RecipeLogLevel {
        self.level
    }

    /// Whether any sink is registered.
    pub fn is_enabled(&self) -> bool {
        !self.loggers.is_empty()
    }
}

/// Represents different types of loggers.
#[derive(Debug)]
enum LoggerKind {
    /// Logs to a file.
    File(FileLogger),

    /// Logs to standard output.
    Stdout,

    /// Logs to standard error.
    Stderr,

    /// Logs using the `log` crate with a specified level.
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
    // Opens the file, or reports through the `log` crate when it cannot be opened.
    fn new(path: &PathBuf, append: bool) -> Option<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path);

        match file {
            Ok(file) => Some(Self {
                writer: BufWriter::new(file),
            }),
            Err(err) => {
                log::warn!("Cannot open recipe log {}: {err}", path.display());
                None
            }
        }
    }

    // A failed write only loses the log line.
    fn log<S: Display>(&mut self, msg: &S) {
        let _ = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());
    }
}
