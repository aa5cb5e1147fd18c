//! Configuration for the HumanSign agent.

use crate::collector::filter::FilterConfig;
use crate::core::classifier::ClassifierConfig;
use crate::core::features::FeatureConfig;
use crate::session::aggregate::PipelineConfig;
use crate::session::buffer::FlushPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dedup and ignore windows, clock skew, assistant channel trust
    pub capture: FilterConfig,

    /// When accepted events are shipped
    pub batching: FlushPolicy,

    /// Timing thresholds for feature extraction
    pub features: FeatureConfig,

    /// Cascade thresholds
    pub classifier: ClassifierConfig,

    /// Remote aggregate to flush to, if any
    pub remote: Option<RemoteConfig>,

    /// Port for `humansign serve`
    pub server_port: u16,

    /// Path for exported reports
    pub export_path: PathBuf,

    /// Path for keys, snapshots, spool and transparency logs
    pub data_path: PathBuf,

    /// Idle time after which the aggregate side forgets a session
    pub session_timeout_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("humansign-agent");

        Self {
            capture: FilterConfig::default(),
            batching: FlushPolicy::default(),
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            remote: None,
            server_port: 8787,
            export_path: data_dir.join("reports"),
            data_path: data_dir,
            session_timeout_minutes: 30,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("humansign-agent")
            .join("config.json")
    }

    /// The per-session tunables.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            capture: self.capture.clone(),
            batching: self.batching.clone(),
            features: self.features.clone(),
            classifier: self.classifier.clone(),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }

    pub fn key_dir(&self) -> PathBuf {
        self.data_path.join("keys")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_path.join("sessions")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.data_path.join("spool")
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency_stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.dedup_window_ms, 100.0);
        assert_eq!(config.batching.max_events, 100);
        assert_eq!(config.features.burst_min_run, 5);
        assert_eq!(config.classifier.volume_threshold, 0.10);
        assert_eq!(config.session_timeout(), Duration::from_secs(1800));
        assert!(config.remote.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"session_timeout_minutes": 5, "remote": {"url": "http://127.0.0.1:8787"}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session_timeout_minutes, 5);
        assert_eq!(config.remote.unwrap().token, None);
        assert_eq!(config.batching, FlushPolicy::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.capture.trusted_assistant_channel = false;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_pipeline_mirrors_sections() {
        let config = Config::default();
        let pipeline = config.pipeline();
        assert_eq!(pipeline.capture, config.capture);
        assert_eq!(pipeline.classifier, config.classifier);
    }
}
