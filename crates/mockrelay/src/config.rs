//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4020
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_watch_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory holding the mock, ledger, and settings files.
    pub data_dir: PathBuf,
    /// Poll interval for external edits to the store files.
    pub watch_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            data_dir: default_data_dir(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind.is_empty() {
            anyhow::bail!("bind address must not be empty");
        }
        if self.watch_interval_ms == 0 {
            anyhow::bail!("watchIntervalMs must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn mocks_path(&self) -> PathBuf {
        self.data_dir.join("mocks.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("requests.json")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:4020");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 9999, "dataDir": "/tmp/mockrelay"}"#).unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.mocks_path(), PathBuf::from("/tmp/mockrelay/mocks.json"));
    }

    #[test]
    fn test_invalid_watch_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"watchIntervalMs": 0}"#).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
    }
}
