//! Event log configuration.

use crate::error::PersistError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Encoding used for the persisted log stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable JSON.
    #[default]
    Json,
    /// Compact tagged binary.
    Binary,
}

impl LogFormat {
    /// File name of the log stream inside the log directory.
    pub fn log_file_name(self) -> &'static str {
        match self {
            LogFormat::Json => "ttdlog.json",
            LogFormat::Binary => "ttdlog.bin",
        }
    }

    /// Detect which format a log directory holds, preferring JSON.
    pub fn detect(log_dir: &Path) -> Option<LogFormat> {
        [LogFormat::Json, LogFormat::Binary]
            .into_iter()
            .find(|f| log_dir.join(f.log_file_name()).is_file())
    }
}

/// Configuration for an [`EventLog`](crate::event_log::EventLog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Directory holding the log stream and the snapshot files.
    pub log_dir: PathBuf,
    /// Encoding used by `emit_log`.
    pub format: LogFormat,
    /// First property id after the engine's built-in property table.
    pub first_custom_property_id: u32,
    /// Execution time (ms) after which the host should take a checkpoint.
    pub snapshot_interval_ms: f64,
    /// Evict persisted snapshot bodies other than the one being inflated.
    pub unload_inactive_snapshots: bool,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("ttd_log"),
            format: LogFormat::Json,
            first_custom_property_id: 1024,
            snapshot_interval_ms: 2_000.0,
            unload_inactive_snapshots: true,
        }
    }
}

impl EventLogConfig {
    /// Config writing to `log_dir` with every other field defaulted.
    pub fn with_log_dir(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Save the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.log_dir.join(self.format.log_file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = EventLogConfig::default();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.unload_inactive_snapshots);
        assert!(config.log_file_path().ends_with("ttdlog.json"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");

        let mut config = EventLogConfig::with_log_dir("/tmp/some_log");
        config.format = LogFormat::Binary;
        config.first_custom_property_id = 7;
        config.save(&path).unwrap();

        let loaded = EventLogConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.log_file_path().ends_with("ttdlog.bin"));
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: EventLogConfig = serde_json::from_str(r#"{"format": "binary"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Binary);
        assert_eq!(config.first_custom_property_id, 1024);
    }

    #[test]
    fn test_detect_format() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(LogFormat::detect(temp_dir.path()), None);

        std::fs::write(temp_dir.path().join("ttdlog.bin"), b"").unwrap();
        assert_eq!(LogFormat::detect(temp_dir.path()), Some(LogFormat::Binary));
    }
}
