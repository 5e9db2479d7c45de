use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing::{error, Level};
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::AgentConfig;

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Output file path (None for stdout)
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            source_location: false,
            file_path: None,
        }
    }
}

impl LogConfig {
    /// Derive logging settings from the agent's `log_level` and `log_file`.
    pub fn from_agent_config(config: &AgentConfig) -> Self {
        Self {
            level: parse_level(&config.log_level),
            file_path: config.log_file.clone(),
            ..Default::default()
        }
    }
}

/// Level for a configured name; `fatal` maps to ERROR and anything unknown
/// to INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" | "fatal" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Initialize logging system. Only the first call installs a subscriber.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::from_default_env().add_directive(config.level.into());

    let mut open_failure = None;
    let writer = match config.file_path.as_deref().map(open_log_file) {
        Some(Ok(file)) => BoxMakeWriter::new(Mutex::new(file)),
        Some(Err(e)) => {
            open_failure = Some(e);
            BoxMakeWriter::new(std::io::stdout)
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location);
    let layer = if config.timestamps {
        layer.boxed()
    } else {
        layer.without_time().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| format!("Failed to set global subscriber: {}", e))?;

    if let (Some(e), Some(path)) = (open_failure, config.file_path) {
        error!(path = %path.display(), error = %e, "Failed to open log file, logging to stdout");
    }
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
