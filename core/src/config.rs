//! C0 Config Loader: daemon-wide settings layered from a YAML
//! file under the user config directory, with CLI overrides applied by the
//! caller, matching `tandem-core::config`'s layered-JSON approach (here
//! `serde_yaml`, alongside `serde_json` for the per-project files).

use crate::error::{DeployBotError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timer_duration_s")]
    pub default_timer_duration_s: u64,
    #[serde(default)]
    pub grace_period_s: u64,
    #[serde(default)]
    pub llm_adapter_endpoint: Option<String>,
    #[serde(default = "default_projects_root")]
    pub default_projects_root: PathBuf,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_timer_duration_s() -> u64 {
    1800
}

fn default_projects_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Projects")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            default_timer_duration_s: default_timer_duration_s(),
            grace_period_s: 0,
            llm_adapter_endpoint: None,
            default_projects_root: default_projects_root(),
        }
    }
}

impl DaemonConfig {
    /// Loads `<config_dir>/config.yaml` if present, else returns defaults.
    /// The LLM adapter key is never read from this file: it is read from
    /// the `DEPLOYBOT_LLM_API_KEY` environment variable at call time,
    /// matching `tandem-core::config`'s discipline of keeping secrets out
    /// of on-disk JSON/YAML.
    pub async fn load(config_dir: &std::path::Path) -> Result<Self> {
        let path = config_dir.join("config.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(&path).await?;
        serde_yaml::from_str(&raw).map_err(|e| DeployBotError::Parse {
            context: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn llm_api_key(&self) -> Option<String> {
        std::env::var("DEPLOYBOT_LLM_API_KEY").ok()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = DaemonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.port, 8765);
    }

    #[tokio::test]
    async fn parses_partial_yaml_with_defaults_for_rest() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("config.yaml"), "port: 9000\n")
            .await
            .unwrap();
        let config = DaemonConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.default_timer_duration_s, 1800);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = DaemonConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8765");
    }
}
