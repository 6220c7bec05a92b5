use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::encoder::{ArgTemplate, EncoderError};

/// Database backend used to reconcile recording filenames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    Sqlite,
}

/// How the pipeline decides whether it may drain the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardKind {
    /// Exclusive advisory lock on `lock_file`
    LockFile,
    /// Look for other running processes with the same executable name
    ProcessScan,
}

/// Configuration errors that stop a run before the queue is touched
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("required setting `{0}` is empty")]
    MissingSetting(&'static str),
    #[error("min_size_ratio must be between 0 and 1, got {0}")]
    InvalidRatio(f64),
    #[error("invalid encoder_args: {0}")]
    InvalidTemplate(#[from] EncoderError),
}

/// Configuration for the recording transcoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Encoder executable to launch
    pub encoder_path: PathBuf,
    /// Encoder argument template; `{0}` is the input path, `{1}` the output path
    pub encoder_args: String,
    /// Extension given to converted files (e.g. "mp4")
    pub output_type: String,
    /// Connection string for the recordings database
    pub connection_string: String,
    pub database: DatabaseKind,
    /// Local path prefix rewritten before the database lookup (e.g. "/mnt/tv/")
    pub path_prefix: String,
    /// Replacement for `path_prefix` (e.g. `\\server\tv\`)
    pub path_replacement: String,
    /// File holding pending paths, one per line
    pub queue_file: PathBuf,
    pub instance_guard: GuardKind,
    /// Lock file used by `GuardKind::LockFile`
    pub lock_file: PathBuf,
    /// Smallest accepted output size as a fraction of the input size
    pub min_size_ratio: f64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl TranscodeConfig {
    /// Create a default configuration. Required settings are left empty.
    pub fn default_config() -> Self {
        Self {
            encoder_path: PathBuf::new(),
            encoder_args: String::new(),
            output_type: String::new(),
            connection_string: String::new(),
            database: DatabaseKind::Sqlite,
            path_prefix: String::new(),
            path_replacement: String::new(),
            queue_file: PathBuf::from("transcoderqueue.txt"),
            instance_guard: GuardKind::LockFile,
            lock_file: PathBuf::from("transcoder.lock"),
            min_size_ratio: 0.2,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Check that every setting needed for a run is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.encoder_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingSetting("encoder_path"));
        }
        if self.encoder_args.trim().is_empty() {
            return Err(ConfigError::MissingSetting("encoder_args"));
        }
        ArgTemplate::parse(&self.encoder_args)?;
        if self.output_type.trim_start_matches('.').is_empty() {
            return Err(ConfigError::MissingSetting("output_type"));
        }
        if self.connection_string.trim().is_empty() {
            return Err(ConfigError::MissingSetting("connection_string"));
        }
        if !(self.min_size_ratio >= 0.0 && self.min_size_ratio <= 1.0) {
            return Err(ConfigError::InvalidRatio(self.min_size_ratio));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn complete_config() -> TranscodeConfig {
        TranscodeConfig {
            encoder_path: PathBuf::from("/usr/bin/ffmpeg"),
            encoder_args: "-i \"{0}\" \"{1}\"".to_string(),
            output_type: "mp4".to_string(),
            connection_string: "Data Source=npvr.db3;Version=3;".to_string(),
            ..TranscodeConfig::default_config()
        }
    }

    #[test]
    fn test_defaults_fail_validation() {
        let cfg = TranscodeConfig::default();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingSetting("encoder_path")));
        assert_eq!(cfg.queue_file, PathBuf::from("transcoderqueue.txt"));
        assert_eq!(cfg.instance_guard, GuardKind::LockFile);
    }

    #[test]
    fn test_each_required_setting_is_checked() {
        assert!(complete_config().validate().is_ok());

        let mut cfg = complete_config();
        cfg.encoder_args = "   ".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingSetting("encoder_args")));

        let mut cfg = complete_config();
        cfg.output_type = ".".to_string();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingSetting("output_type")));

        let mut cfg = complete_config();
        cfg.connection_string.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingSetting("connection_string")));

        let mut cfg = complete_config();
        cfg.encoder_args = "-i \"{0}".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidTemplate(_))));

        let mut cfg = complete_config();
        cfg.min_size_ratio = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidRatio(1.5)));
    }

    #[test]
    fn test_load_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcoder.toml");
        fs::write(
            &path,
            r#"
encoder_path = "/usr/bin/ffmpeg"
encoder_args = '-i "{0}" -c:v libx264 "{1}"'
output_type = "mp4"
connection_string = "/var/lib/npvr/npvr.db3"
path_prefix = "/mnt/tv/"
path_replacement = '\\server\tv\'
instance_guard = "process_scan"
"#,
        )
        .unwrap();

        let cfg = TranscodeConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.output_type, "mp4");
        assert_eq!(cfg.path_replacement, "\\\\server\\tv\\");
        assert_eq!(cfg.instance_guard, GuardKind::ProcessScan);
        assert_eq!(cfg.database, DatabaseKind::Sqlite);
        assert_eq!(cfg.min_size_ratio, 0.2);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcoder.json");
        fs::write(
            &path,
            r#"{"encoder_path": "ffmpeg", "encoder_args": "{0} {1}", "output_type": "mkv",
                "connection_string": "x.db", "queue_file": "/tmp/q.txt"}"#,
        )
        .unwrap();

        let cfg = TranscodeConfig::load_config(Some(&path)).unwrap();
        assert_eq!(cfg.queue_file, PathBuf::from("/tmp/q.txt"));
        assert_eq!(cfg.lock_file, PathBuf::from("transcoder.lock"));
    }

    #[test]
    fn test_missing_config_file_yields_defaults() {
        let cfg = TranscodeConfig::load_config(Some(Path::new("/nonexistent/transcoder.toml"))).unwrap();
        assert!(cfg.encoder_args.is_empty());
    }
}
