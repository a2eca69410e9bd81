//! C3 Project Directory Registry: maps project name -> filesystem path,
//! persisted as a JSON mapping file under the user config directory.

use crate::error::{DeployBotError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectMappingFile {
    pub version: u32,
    pub last_updated: String,
    pub default_projects_root: String,
    pub total_projects: usize,
    pub project_mappings: HashMap<String, PathBuf>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub exists: bool,
    pub is_directory: bool,
    pub writable: bool,
    pub has_config: bool,
    pub has_todo: bool,
    pub has_logs_dir: bool,
    pub issues: Vec<String>,
}

pub struct ProjectRegistry {
    mapping_path: PathBuf,
    default_projects_root: PathBuf,
    config_dir: PathBuf,
    mappings: RwLock<HashMap<String, PathBuf>>,
}

impl ProjectRegistry {
    pub async fn new(config_dir: PathBuf, default_projects_root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&config_dir).await?;
        let mapping_path = config_dir.join("project_mappings.json");
        let mappings = if mapping_path.exists() {
            let raw = tokio::fs::read_to_string(&mapping_path).await?;
            serde_json::from_str::<ProjectMappingFile>(&raw)
                .map(|f| f.project_mappings)
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            mapping_path,
            default_projects_root,
            config_dir,
            mappings: RwLock::new(mappings),
        })
    }

    pub fn system_log_path(&self) -> PathBuf {
        self.config_dir.join("logs").join("system_activity.log")
    }

    pub async fn resolve(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.mappings.read().await.get(name).cloned() {
            return Some(path);
        }
        let candidate = self.default_projects_root.join(name);
        if candidate.join("config.json").exists() && candidate.join("TODO.md").exists() {
            Some(candidate)
        } else {
            None
        }
    }

    pub async fn add(&self, name: &str, path: PathBuf) -> Result<()> {
        self.mappings
            .write()
            .await
            .insert(name.to_string(), path);
        self.persist().await
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        self.mappings.write().await.remove(name);
        self.persist().await
    }

    pub async fn list_all(&self) -> Vec<(String, PathBuf)> {
        let mut out: HashMap<String, PathBuf> = self.mappings.read().await.clone();

        if let Ok(mut entries) = tokio::fs::read_dir(&self.default_projects_root).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                if !path.join("config.json").exists() || !path.join("TODO.md").exists() {
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                out.entry(name.to_string()).or_insert(path);
            }
        }

        let mut list: Vec<(String, PathBuf)> = out.into_iter().collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub async fn validate(&self, path: &Path) -> ValidationReport {
        let mut issues = Vec::new();
        let exists = path.exists();
        let is_directory = path.is_dir();
        if !exists {
            issues.push("path does not exist".to_string());
        } else if !is_directory {
            issues.push("path is not a directory".to_string());
        }

        let writable = is_directory && is_writable(path);
        if is_directory && !writable {
            issues.push("path is not writable".to_string());
        }

        let has_config = path.join("config.json").exists();
        if !has_config {
            issues.push("missing config.json".to_string());
        }
        let has_todo = path.join("TODO.md").exists();
        if !has_todo {
            issues.push("missing TODO.md".to_string());
        }
        let has_logs_dir = path.join("logs").is_dir();

        ValidationReport {
            exists,
            is_directory,
            writable,
            has_config,
            has_todo,
            has_logs_dir,
            issues,
        }
    }

    /// Backfills the mapping from the default projects directory so project
    /// folders created before the registry existed are discoverable by
    /// `resolve` without a prior explicit `add`.
    pub async fn migrate_existing(&self) -> Result<usize> {
        let discovered = self.list_all().await;
        let mut added = 0;
        {
            let mut mappings = self.mappings.write().await;
            for (name, path) in discovered {
                mappings.entry(name).or_insert_with(|| {
                    added += 1;
                    path
                });
            }
        }
        if added > 0 {
            self.persist().await?;
        }
        Ok(added)
    }

    /// Write-to-temp-file then rename, so a crash mid-write never leaves a
    /// truncated mapping file behind.
    async fn persist(&self) -> Result<()> {
        let mappings = self.mappings.read().await.clone();
        let doc = ProjectMappingFile {
            version: 1,
            last_updated: chrono::Utc::now().to_rfc3339(),
            default_projects_root: self.default_projects_root.display().to_string(),
            total_projects: mappings.len(),
            project_mappings: mappings,
            metadata: serde_json::Map::new(),
        };
        let payload = serde_json::to_string_pretty(&doc)?;

        let tmp_path = self.mapping_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, payload).await?;
        tokio::fs::rename(&tmp_path, &self.mapping_path)
            .await
            .map_err(DeployBotError::TransientIo)?;
        Ok(())
    }
}

#[cfg(unix)]
fn is_writable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o200 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_writable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn add_then_resolve_then_remove() {
        let config_dir = tempdir().unwrap();
        let projects_root = tempdir().unwrap();
        let registry = ProjectRegistry::new(
            config_dir.path().to_path_buf(),
            projects_root.path().to_path_buf(),
        )
        .await
        .unwrap();

        let project_path = tempdir().unwrap();
        registry
            .add("demo", project_path.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(
            registry.resolve("demo").await,
            Some(project_path.path().to_path_buf())
        );

        registry.remove("demo").await.unwrap();
        assert_eq!(registry.resolve("demo").await, None);
    }

    #[tokio::test]
    async fn mapping_file_persists_across_instances() {
        let config_dir = tempdir().unwrap();
        let projects_root = tempdir().unwrap();
        let project_path = tempdir().unwrap();

        {
            let registry = ProjectRegistry::new(
                config_dir.path().to_path_buf(),
                projects_root.path().to_path_buf(),
            )
            .await
            .unwrap();
            registry
                .add("demo", project_path.path().to_path_buf())
                .await
                .unwrap();
        }

        let reopened = ProjectRegistry::new(
            config_dir.path().to_path_buf(),
            projects_root.path().to_path_buf(),
        )
        .await
        .unwrap();
        assert_eq!(
            reopened.resolve("demo").await,
            Some(project_path.path().to_path_buf())
        );
    }

    #[tokio::test]
    async fn list_all_skips_folders_missing_config_or_todo() {
        let config_dir = tempdir().unwrap();
        let projects_root = tempdir().unwrap();

        let complete = projects_root.path().join("complete");
        tokio::fs::create_dir_all(&complete).await.unwrap();
        tokio::fs::write(complete.join("config.json"), "{}")
            .await
            .unwrap();
        tokio::fs::write(complete.join("TODO.md"), "# TODO")
            .await
            .unwrap();

        let incomplete = projects_root.path().join("incomplete");
        tokio::fs::create_dir_all(&incomplete).await.unwrap();

        let registry = ProjectRegistry::new(
            config_dir.path().to_path_buf(),
            projects_root.path().to_path_buf(),
        )
        .await
        .unwrap();

        let all = registry.list_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "complete");
    }
}
