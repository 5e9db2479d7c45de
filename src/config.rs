// Location: src/config.rs

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::error::{AgentError, Result};

/// Longest accepted worker period.
pub const MAX_WORKER_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Whether the agent records and reports at all
    pub monitor: bool,

    /// Log level name (debug, info, warn, error, fatal)
    pub log_level: String,

    /// Log file; stdout when unset or when the file can't be opened
    pub log_file: Option<PathBuf>,

    pub worker: WorkerConfig,
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interval between sampling/report cycles
    pub period: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Root metric name prefixes that mark a completed request
    pub entry_prefixes: Vec<String>,

    /// Non-root frames slower than this get a call-site backtrace
    pub slow_frame_threshold: Duration,

    /// Minimum root duration for a transaction to be kept as the slow sample
    pub slow_transaction_threshold: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            monitor: true,
            log_level: "info".to_string(),
            log_file: None,
            worker: WorkerConfig::default(),
            recorder: RecorderConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            entry_prefixes: vec!["Controller/".to_string()],
            slow_frame_threshold: Duration::from_millis(500),
            slow_transaction_threshold: Duration::from_secs(2),
        }
    }
}

impl RecorderConfig {
    /// Whether `metric_name` names a request entry point.
    pub fn is_entry_point(&self, metric_name: &str) -> bool {
        self.entry_prefixes
            .iter()
            .any(|prefix| metric_name.starts_with(prefix.as_str()))
    }
}

impl AgentConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| AgentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AgentConfig = serde_json::from_str(&raw).map_err(|source| AgentError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.period.is_zero() {
            return Err(AgentError::config(
                "worker.period",
                "Period must be greater than zero",
            ));
        }

        if self.worker.period > MAX_WORKER_PERIOD {
            return Err(AgentError::config(
                "worker.period",
                format!("Period cannot exceed {}s", MAX_WORKER_PERIOD.as_secs()),
            ));
        }

        if self.recorder.entry_prefixes.is_empty() {
            return Err(AgentError::config(
                "recorder.entry_prefixes",
                "At least one entry prefix is required",
            ));
        }

        if self.recorder.entry_prefixes.iter().any(|p| p.is_empty()) {
            return Err(AgentError::config(
                "recorder.entry_prefixes",
                "Entry prefixes cannot be empty strings",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert!(config.monitor);
        assert_eq!(config.worker.period, Duration::from_secs(60));
        assert_eq!(config.recorder.slow_frame_threshold, Duration::from_millis(500));
        assert_eq!(config.recorder.slow_transaction_threshold, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_entry_point_matching() {
        let config = RecorderConfig::default();
        assert!(config.is_entry_point("Controller/users/index"));
        assert!(!config.is_entry_point("View/users/index/Rendering"));
        assert!(!config.is_entry_point("Controllers"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AgentConfig::default();
        config.worker.period = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(AgentError::Configuration { ref parameter, .. }) if parameter == "worker.period"
        ));

        let mut config = AgentConfig::default();
        config.recorder.entry_prefixes.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_period_upper_bound() {
        let mut config = AgentConfig::default();
        config.worker.period = MAX_WORKER_PERIOD;
        assert!(config.validate().is_ok());

        config.worker.period = Duration::from_secs(u64::MAX / 2);
        assert!(matches!(
            config.validate(),
            Err(AgentError::Configuration { ref parameter, .. }) if parameter == "worker.period"
        ));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"log_level": "debug", "worker": {{"period": {{"secs": 30, "nanos": 0}}}}}}"#
        )
        .unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.worker.period, Duration::from_secs(30));
        assert_eq!(config.recorder.entry_prefixes, vec!["Controller/".to_string()]);
    }

    #[test]
    fn test_from_file_errors() {
        let missing = AgentConfig::from_file("/definitely/not/here.json");
        assert!(matches!(missing, Err(AgentError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let malformed = AgentConfig::from_file(file.path());
        assert!(matches!(malformed, Err(AgentError::Parse { .. })));
    }
}
