//! Logging configuration and initialization
//!
//! The shim is usually loaded into a host runtime that may already have a
//! `tracing` subscriber installed, so initialization never panics: if a
//! global subscriber exists the call reports it and leaves it alone.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter, takes precedence (e.g. "fletcher_alveo=debug")
//! - `FLETCHER_LOG_LEVEL`: Simple log level (error, warn, info, debug, trace)
//! - `FLETCHER_LOG_FORMAT`: Output format ("human" or "json")
//! - `FLETCHER_LOG_FILE`: Optional file path for an extra JSON log

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

static TRACING_INITIALIZED: OnceCell<()> = OnceCell::new();

pub const LOG_LEVEL_ENV: &str = "FLETCHER_LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "FLETCHER_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "FLETCHER_LOG_FILE";
const RUST_LOG_ENV: &str = "RUST_LOG";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("failed to create log directory {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file {path}: {source}")]
    FileOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The host process already installed a global subscriber
    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    /// Default: a shim inside a host runtime should stay quiet
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLogLevel(s.to_string())),
        }
    }
}

/// Console output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" | "console" => Ok(LogFormat::Human),
            "json" | "structured" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Include source file and line in console output
    pub with_file_info: bool,
    /// Emit span close events
    pub with_span_events: bool,
    /// Extra JSON log file, appended to
    pub log_file: Option<PathBuf>,
    /// Raw `RUST_LOG` directive; overrides `level` when set
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the process environment
    pub fn from_env() -> Result<Self, LoggingError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, LoggingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = LoggingConfig::new();
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            config.level = level.parse()?;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Some(file) = lookup(LOG_FILE_ENV).filter(|f| !f.is_empty()) {
            config.log_file = Some(PathBuf::from(file));
        }
        config.filter = lookup(RUST_LOG_ENV).filter(|f| !f.trim().is_empty());
        Ok(config)
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file_info(mut self, with_file_info: bool) -> Self {
        self.with_file_info = with_file_info;
        self
    }

    pub fn with_span_events(mut self, with_span_events: bool) -> Self {
        self.with_span_events = with_span_events;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Filter directive in effect: `RUST_LOG` style filter, else the level
    pub fn build_env_filter(&self) -> Result<EnvFilter, LoggingError> {
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter {
                filter: filter.clone(),
                reason: e.to_string(),
            }),
            None => Ok(EnvFilter::new(self.level.as_filter_str())),
        }
    }
}

/// Initialize logging from the environment, ignoring failures.
///
/// Called by the C entry points so a runtime that loads the shim gets its
/// diagnostics without any setup of its own.
pub fn init_logging_default() {
    if let Err(e) = init_logging_from_env() {
        // No subscriber of ours is running, so stderr is the only channel.
        if !matches!(e, LoggingError::AlreadyInstalled) {
            eprintln!("fletcher-alveo: logging disabled: {}", e);
        }
    }
}

/// Initialize logging from `RUST_LOG` and the `FLETCHER_LOG_*` variables.
///
/// Idempotent once it has succeeded.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    if is_initialized() {
        return Ok(());
    }
    let config = LoggingConfig::from_env()?;
    init_with_config(&config)
}

/// Initialize logging with an explicit configuration. Idempotent.
pub fn init_with_config(config: &LoggingConfig) -> Result<(), LoggingError> {
    TRACING_INITIALIZED
        .get_or_try_init(|| install(config))
        .map(|_| ())
}

pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.get().is_some()
}

fn install(config: &LoggingConfig) -> Result<(), LoggingError> {
    let env_filter = config.build_env_filter()?;

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .with_span_events(span_events(config.with_span_events)),
            )
        }
        None => None,
    };

    let console = match config.format {
        LogFormat::Human => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(span_events(config.with_span_events))
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_file(config.with_file_info)
            .with_line_number(config.with_file_info)
            .with_span_events(span_events(config.with_span_events))
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInstalled)
}

fn span_events(enabled: bool) -> FmtSpan {
    if enabled {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, LoggingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LoggingError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LoggingError::FileOpenFailed {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!(matches!(
            "loud".parse::<LogLevel>(),
            Err(LoggingError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = LoggingConfig::from_lookup(lookup(&[
            (LOG_LEVEL_ENV, "trace"),
            (LOG_FORMAT_ENV, "json"),
            (LOG_FILE_ENV, "/tmp/fletcher.log"),
        ]))
        .unwrap();
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/fletcher.log")));
        assert_eq!(config.filter, None);
    }

    #[test]
    fn test_config_defaults_without_env() {
        let config = LoggingConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Human);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_bad_level_in_env_is_an_error() {
        let result = LoggingConfig::from_lookup(lookup(&[(LOG_LEVEL_ENV, "verbose")]));
        assert!(matches!(result, Err(LoggingError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_rust_log_takes_precedence() {
        let config = LoggingConfig::from_lookup(lookup(&[
            (LOG_LEVEL_ENV, "error"),
            (RUST_LOG_ENV, "fletcher_alveo=trace"),
        ]))
        .unwrap();
        let filter = config.build_env_filter().unwrap();
        assert!(filter.to_string().contains("fletcher_alveo=trace"));
    }

    #[test]
    fn test_level_filter_without_rust_log() {
        let config = LoggingConfig::new().with_level(LogLevel::Debug);
        assert_eq!(config.build_env_filter().unwrap().to_string(), "debug");
    }

    #[test]
    fn test_invalid_filter() {
        let config = LoggingConfig::new().with_filter("fletcher_alveo=notalevel");
        assert!(matches!(
            config.build_env_filter(),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/shim.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_init_default_idempotent() {
        init_logging_default();
        init_logging_default();
        let _ = is_initialized();
    }
}
