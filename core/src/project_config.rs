//! Project config round-trip: `<project>/config.json`. Unknown
//! fields are preserved via `ProjectConfig`'s `#[serde(flatten)]` bag so a
//! read-modify-write never drops data this build doesn't know about.

use crate::error::{DeployBotError, Result};
use crate::model::ProjectConfig;
use std::path::Path;

pub async fn load(project_path: &Path) -> Result<ProjectConfig> {
    let path = project_path.join("config.json");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let raw = tokio::fs::read_to_string(&path).await?;
    serde_json::from_str(&raw).map_err(|e| DeployBotError::Parse {
        context: path.display().to_string(),
        message: e.to_string(),
    })
}

pub async fn save(project_path: &Path, config: &ProjectConfig) -> Result<()> {
    let path = project_path.join("config.json");
    let payload = serde_json::to_string_pretty(config)?;
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, payload).await?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(DeployBotError::TransientIo)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_config_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load(dir.path()).await.unwrap();
        assert_eq!(config.settings.default_timer, 1800);
    }

    #[tokio::test]
    async fn unknown_fields_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"projectName":"demo","futureField":{"nested":true}}"#,
        )
        .await
        .unwrap();

        let config = load(dir.path()).await.unwrap();
        assert_eq!(config.project_name.as_deref(), Some("demo"));
        assert!(config.metadata.contains_key("futureField"));

        save(dir.path(), &config).await.unwrap();
        let reloaded = load(dir.path()).await.unwrap();
        assert!(reloaded.metadata.contains_key("futureField"));
    }
}
