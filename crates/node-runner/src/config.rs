//! Runner configuration storage
//!
//! Kept as `config.json` in the config directory. Relative paths in the
//! file are resolved against that directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use node_engine::config::default_max_threads;
use node_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use tokio::fs;

const CONFIG_FILE: &str = "config.json";

/// AI and code service endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// OpenAI-compatible chat completion server
    pub completion_url: Option<String>,
    pub completion_model: String,
    /// whisper.cpp server
    pub transcription_url: Option<String>,
    /// Python code server for `code_python` nodes
    pub code_url: Option<String>,
    /// Where service responses are cached; in memory when unset
    pub cache_dir: Option<PathBuf>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            completion_url: None,
            completion_model: "llama".to_string(),
            transcription_url: None,
            code_url: None,
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub max_threads: usize,
    /// Directory of `<program>/main` worker binaries
    pub workers_dir: PathBuf,
    /// 0 picks a free port
    pub worker_port: u16,
    pub http_timeout_secs: u64,
    pub graph_path: PathBuf,
    pub max_undo: usize,
    pub services: ServicesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            max_threads: default_max_threads(),
            workers_dir: engine.workers_dir,
            worker_port: engine.worker_port,
            http_timeout_secs: engine.http_timeout.as_secs(),
            graph_path: PathBuf::from("graph.json"),
            max_undo: engine.max_undo,
            services: ServicesConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk
    pub async fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        if !fs::try_exists(&config_path).await? {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&config_path).await?;
        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to disk
    pub async fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        fs::create_dir_all(config_dir).await?;
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        fs::write(&config_path, contents).await?;
        log::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    /// Make relative paths absolute under `config_dir`
    pub fn resolve_paths(&mut self, config_dir: &Path) {
        for path in [&mut self.workers_dir, &mut self.graph_path] {
            if path.is_relative() {
                *path = config_dir.join(&*path);
            }
        }
        if let Some(dir) = self.services.cache_dir.as_mut() {
            if dir.is_relative() {
                *dir = config_dir.join(&*dir);
            }
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_threads: self.max_threads.max(1),
            workers_dir: self.workers_dir.clone(),
            worker_port: self.worker_port,
            http_timeout: self.http_timeout(),
            max_undo: self.max_undo,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.http_timeout_secs, 1800);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.worker_port = 4000;
        config.services.completion_url = Some("http://localhost:8080".into());
        config.services.code_url = Some("http://localhost:8092".into());
        config.save(dir.path()).await.unwrap();

        let loaded = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"max_threads": 3}"#).unwrap();
        let config = AppConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.max_threads, 3);
        assert_eq!(config.graph_path, PathBuf::from("graph.json"));
        assert_eq!(config.services.completion_model, "llama");
    }

    #[tokio::test]
    async fn test_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{").unwrap();
        assert!(matches!(
            AppConfig::load(dir.path()).await,
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_engine_config_and_paths() {
        let mut config = AppConfig {
            max_threads: 0,
            http_timeout_secs: 5,
            ..AppConfig::default()
        };
        config.resolve_paths(Path::new("/etc/runner"));
        assert_eq!(config.graph_path, PathBuf::from("/etc/runner/graph.json"));

        let engine = config.engine_config();
        assert_eq!(engine.max_threads, 1);
        assert_eq!(engine.http_timeout, Duration::from_secs(5));
        assert_eq!(engine.workers_dir, PathBuf::from("/etc/runner/workers"));
    }
}
