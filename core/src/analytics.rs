//! C2 Analytics Store: append-only JSON shards per project, sharded by month.
//! Reads union records across the months a window intersects;
//! writes are read-modify-write, serialized per file via `file_lock`.

use crate::error::{DeployBotError, Result};
use crate::model::{
    CompletionMethod, DeploySession, DeployPattern, Interaction, InteractionType, SessionStatus,
    Suggestion, SuggestionContext, Task, TimeOfDay, Timestamped,
};
use crate::project_registry::ProjectRegistry;
use chrono::{Datelike, Duration, Timelike, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default, serde::Serialize)]
pub struct TaskPatterns {
    pub total_completed: u32,
    pub avg_completion_time: f64,
    pub avg_productivity_score: f64,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct TaskAnalytics {
    pub suggestions_count: u32,
    pub accepted: u32,
    pub ignored: u32,
    pub snoozed: u32,
    pub recent_ignores_30d: u32,
    pub acceptance_rate: f64,
    pub completion_rate: f64,
    pub avg_response_time: f64,
    pub task_patterns: TaskPatterns,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct DeployAnalytics {
    pub total_sessions: u32,
    pub total_time_saved_s: u64,
    pub avg_productivity_score: f64,
    pub top_commands: Vec<(String, u32)>,
    pub time_of_day_histogram: HashMap<String, u32>,
}

pub struct AnalyticsStore {
    registry: Arc<ProjectRegistry>,
    active_sessions: Mutex<HashMap<String, DeploySession>>,
    file_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl AnalyticsStore {
    pub fn new(registry: Arc<ProjectRegistry>) -> Self {
        Self {
            registry,
            active_sessions: Mutex::new(HashMap::new()),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn record_suggestion(
        &self,
        task: &Task,
        project: &str,
        deploy_command: &str,
        timer_duration_s: u64,
        context: SuggestionContext,
    ) -> Result<String> {
        let now = Utc::now();
        let id = suggestion_id(&task.text, now.timestamp_millis());
        let suggestion = Suggestion {
            id: id.clone(),
            task_id: task.id.clone(),
            task_text: task.text.clone(),
            task_tags: task.tags.iter().cloned().collect(),
            suggested_app: task.app.clone(),
            suggestion_ts: now,
            deploy_command: deploy_command.to_string(),
            timer_duration_s,
            context,
            project: project.to_string(),
        };
        self.append(project, "suggestions", &now_month(), suggestion)
            .await?;
        Ok(id)
    }

    pub async fn record_interaction(
        &self,
        suggestion_id: &str,
        kind: InteractionType,
        response_time_s: f64,
        project: &str,
        completion_method: Option<CompletionMethod>,
    ) -> Result<()> {
        let interaction = Interaction {
            suggestion_id: suggestion_id.to_string(),
            kind,
            ts: Utc::now(),
            response_time_s,
            completion_detected: completion_method.is_some(),
            completion_method,
            time_in_app_s: None,
            productivity_score: None,
        };
        self.append(project, "interactions", &now_month(), interaction)
            .await
    }

    pub async fn start_session(
        &self,
        project: &str,
        command: &str,
        timer_duration_s: u64,
    ) -> String {
        let session = DeploySession::new(project, command, timer_duration_s);
        let id = session.session_id.clone();
        self.active_sessions.lock().await.insert(id.clone(), session);
        id
    }

    pub async fn end_session(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let mut session = self
            .active_sessions
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| DeployBotError::NotFound(format!("session {session_id}")))?;
        session.end(status);
        let project = session.project.clone();
        let month = session.session_start.format("%Y-%m").to_string();
        self.append(&project, "sessions", &month, session).await
    }

    /// Idempotent: only the first call within a session mutates.
    pub async fn record_switch(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.active_sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| DeployBotError::NotFound(format!("session {session_id}")))?;
        Ok(session.record_switch())
    }

    pub async fn update_session_task_counts(
        &self,
        session_id: &str,
        suggested_delta: i32,
        accepted_delta: i32,
    ) -> Result<()> {
        let mut sessions = self.active_sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| DeployBotError::NotFound(format!("session {session_id}")))?;
        session.tasks_suggested = (session.tasks_suggested as i32 + suggested_delta).max(0) as u32;
        session.tasks_accepted = (session.tasks_accepted as i32 + accepted_delta).max(0) as u32;
        Ok(())
    }

    pub async fn record_deploy_pattern(
        &self,
        project: &str,
        deploy_command: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let history = self
            .read_window::<DeployPattern>(project, "deploy_patterns", 30)
            .await
            .unwrap_or_default();
        let matching = history
            .iter()
            .filter(|p| p.deploy_command == deploy_command)
            .count();
        let pattern = DeployPattern {
            project: project.to_string(),
            deploy_command: deploy_command.to_string(),
            deploy_ts: now,
            time_of_day: TimeOfDay::from_hour(now.hour()),
            day_of_week: now.format("%A").to_string(),
            deploy_frequency_score: (matching as f64 + 1.0) / (history.len() as f64 + 1.0),
        };
        self.append(project, "deploy_patterns", &now_month(), pattern)
            .await
    }

    pub async fn get_task_analytics(
        &self,
        project: &str,
        task_text: Option<&str>,
        days: i64,
    ) -> Result<TaskAnalytics> {
        let cutoff = Utc::now() - Duration::days(days);
        let suggestions = self
            .read_window::<Suggestion>(project, "suggestions", days)
            .await?;
        let interactions = self
            .read_window::<Interaction>(project, "interactions", days)
            .await?;

        let matching_ids: std::collections::HashSet<String> = suggestions
            .iter()
            .filter(|s| task_text.map(|t| s.task_text == t).unwrap_or(true))
            .map(|s| s.id.clone())
            .collect();

        let relevant: Vec<&Interaction> = interactions
            .iter()
            .filter(|i| matching_ids.contains(&i.suggestion_id))
            .collect();

        let accepted = relevant
            .iter()
            .filter(|i| i.kind == InteractionType::Accepted)
            .count() as u32;
        let ignored = relevant
            .iter()
            .filter(|i| i.kind == InteractionType::Ignored)
            .count() as u32;
        let snoozed = relevant
            .iter()
            .filter(|i| i.kind == InteractionType::Snoozed)
            .count() as u32;
        let recent_ignores_30d = relevant
            .iter()
            .filter(|i| i.kind == InteractionType::Ignored && i.ts >= cutoff)
            .count() as u32;

        let suggestions_count = matching_ids.len() as u32;
        let acceptance_rate = if suggestions_count > 0 {
            accepted as f64 / suggestions_count as f64
        } else {
            0.0
        };

        let completed: Vec<&Interaction> =
            relevant.iter().filter(|i| i.completion_detected).copied().collect();
        let completion_rate = if !relevant.is_empty() {
            completed.len() as f64 / relevant.len() as f64
        } else {
            0.0
        };
        let avg_response_time = average(relevant.iter().map(|i| i.response_time_s));
        let avg_completion_time = average(completed.iter().filter_map(|i| i.time_in_app_s));
        let avg_productivity_score =
            average(completed.iter().filter_map(|i| i.productivity_score));

        Ok(TaskAnalytics {
            suggestions_count,
            accepted,
            ignored,
            snoozed,
            recent_ignores_30d,
            acceptance_rate,
            completion_rate,
            avg_response_time,
            task_patterns: TaskPatterns {
                total_completed: completed.len() as u32,
                avg_completion_time,
                avg_productivity_score,
            },
        })
    }

    pub async fn get_deploy_analytics(&self, project: &str, days: i64) -> Result<DeployAnalytics> {
        let sessions = self
            .read_window::<DeploySession>(project, "sessions", days)
            .await?;
        let patterns = self
            .read_window::<DeployPattern>(project, "deploy_patterns", days)
            .await?;

        let total_time_saved_s = sessions.iter().map(|s| s.estimated_time_saved_s).sum();
        let avg_productivity_score =
            average(sessions.iter().filter_map(|s| s.productivity_score));

        let mut counts: HashMap<String, u32> = HashMap::new();
        for pattern in &patterns {
            *counts.entry(pattern.deploy_command.clone()).or_default() += 1;
        }
        let mut top_commands: Vec<(String, u32)> = counts.into_iter().collect();
        top_commands.sort_by(|a, b| b.1.cmp(&a.1));
        top_commands.truncate(5);

        let mut time_of_day_histogram: HashMap<String, u32> = HashMap::new();
        for pattern in &patterns {
            *time_of_day_histogram
                .entry(pattern.time_of_day.as_str().to_string())
                .or_default() += 1;
        }

        Ok(DeployAnalytics {
            total_sessions: sessions.len() as u32,
            total_time_saved_s,
            avg_productivity_score,
            top_commands,
            time_of_day_histogram,
        })
    }

    async fn append<T: Serialize + DeserializeOwned>(
        &self,
        project: &str,
        collection: &str,
        month: &str,
        record: T,
    ) -> Result<()> {
        let path = self.shard_path(project, collection, month).await?;
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        let mut records = read_shard::<T>(&path, collection).await?;
        records.push(record);
        write_shard(&path, collection, month, &records).await
    }

    async fn read_window<T: DeserializeOwned + Timestamped>(
        &self,
        project: &str,
        collection: &str,
        days: i64,
    ) -> Result<Vec<T>> {
        let cutoff = Utc::now() - Duration::days(days);
        let mut all = Vec::new();
        for month in months_covering(days) {
            let path = self.shard_path(project, collection, &month).await?;
            if !path.exists() {
                continue;
            }
            let lock = self.lock_for(&path).await;
            let _guard = lock.lock().await;
            all.extend(read_shard::<T>(&path, collection).await?);
        }
        all.retain(|record| record.record_ts() >= cutoff);
        Ok(all)
    }

    async fn shard_path(&self, project: &str, collection: &str, month: &str) -> Result<PathBuf> {
        let root = self
            .registry
            .resolve(project)
            .await
            .ok_or_else(|| DeployBotError::NotFound(format!("project {project}")))?;
        let dir = root.join("analytics");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!("{collection}_{month}.json")))
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.file_locks
            .lock()
            .await
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

async fn read_shard<T: DeserializeOwned>(path: &Path, collection: &str) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let doc: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| DeployBotError::Parse {
            context: path.display().to_string(),
            message: e.to_string(),
        })?;
    let records = doc
        .get(collection)
        .cloned()
        .unwrap_or(serde_json::Value::Array(Vec::new()));
    serde_json::from_value(records).map_err(DeployBotError::Serialization)
}

async fn write_shard<T: Serialize>(
    path: &Path,
    collection: &str,
    month: &str,
    records: &[T],
) -> Result<()> {
    let mut doc = serde_json::Map::new();
    doc.insert("month".to_string(), serde_json::Value::String(month.to_string()));
    doc.insert(collection.to_string(), serde_json::to_value(records)?);
    let payload = serde_json::to_string_pretty(&serde_json::Value::Object(doc))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, payload).await?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(DeployBotError::TransientIo)?;
    Ok(())
}

fn suggestion_id(task_text: &str, ts_millis: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_text.as_bytes());
    hasher.update(ts_millis.to_le_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

fn now_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

fn months_covering(days: i64) -> Vec<String> {
    let mut months = Vec::new();
    let now = Utc::now();
    let mut cursor = now - Duration::days(days.max(0));
    loop {
        let label = cursor.format("%Y-%m").to_string();
        if months.last() != Some(&label) {
            months.push(label);
        }
        if cursor.year() == now.year() && cursor.month() == now.month() {
            break;
        }
        cursor = cursor + Duration::days(28);
    }
    months
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SuggestionContext;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    async fn registry_with_project(name: &str) -> (tempfile::TempDir, tempfile::TempDir, Arc<ProjectRegistry>) {
        let config_dir = tempdir().unwrap();
        let projects_root = tempdir().unwrap();
        let project_path = projects_root.path().join(name);
        tokio::fs::create_dir_all(&project_path).await.unwrap();
        tokio::fs::write(project_path.join("config.json"), "{}")
            .await
            .unwrap();
        tokio::fs::write(project_path.join("TODO.md"), "# TODO")
            .await
            .unwrap();
        let registry = Arc::new(
            ProjectRegistry::new(
                config_dir.path().to_path_buf(),
                projects_root.path().to_path_buf(),
            )
            .await
            .unwrap(),
        );
        (config_dir, projects_root, registry)
    }

    fn sample_task() -> Task {
        Task {
            id: "t1".into(),
            text: "write release notes".into(),
            original_text: "- [ ] write release notes #writing".into(),
            tags: BTreeSet::from(["writing".to_string()]),
            completed: false,
            section: "Now".into(),
            line_number: 3,
            app: "Bear".into(),
            priority: 2,
            estimated_duration_min: 15,
        }
    }

    #[tokio::test]
    async fn record_switch_is_idempotent_through_store() {
        let (_c, _p, registry) = registry_with_project("demo").await;
        let store = AnalyticsStore::new(registry);
        let session_id = store.start_session("demo", "firebase deploy", 1800).await;
        assert!(store.record_switch(&session_id).await.unwrap());
        assert!(!store.record_switch(&session_id).await.unwrap());
    }

    #[tokio::test]
    async fn record_suggestion_then_interaction_roundtrips() {
        let (_c, _p, registry) = registry_with_project("demo").await;
        let store = AnalyticsStore::new(registry);
        let task = sample_task();
        let context = SuggestionContext {
            time_of_day: "morning".into(),
            project_type: "web".into(),
            recent_deploys: 1,
            deploy_active: true,
            priority: task.priority,
            estimated_duration: task.estimated_duration_min,
        };
        let suggestion_id = store
            .record_suggestion(&task, "demo", "firebase deploy", 1800, context)
            .await
            .unwrap();
        store
            .record_interaction(&suggestion_id, InteractionType::Accepted, 4.2, "demo", None)
            .await
            .unwrap();

        let analytics = store.get_task_analytics("demo", None, 30).await.unwrap();
        assert_eq!(analytics.suggestions_count, 1);
        assert_eq!(analytics.accepted, 1);
        assert!((analytics.acceptance_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn end_session_persists_productivity_score() {
        let (_c, _p, registry) = registry_with_project("demo").await;
        let store = AnalyticsStore::new(registry);
        let session_id = store.start_session("demo", "firebase deploy", 1800).await;
        store.record_switch(&session_id).await.unwrap();
        store
            .end_session(&session_id, SessionStatus::Completed)
            .await
            .unwrap();

        let analytics = store.get_deploy_analytics("demo", 30).await.unwrap();
        assert_eq!(analytics.total_sessions, 1);
        assert_eq!(analytics.total_time_saved_s, 1800);
    }
}
