//! C7 Task Selector: heuristic scoring plus an optional LLM adapter trait,
//! matching `tandem-core`'s provider-adapter style and `src-tauri`'s
//! consistent use of `reqwest` for outbound calls.

use crate::model::{Task, TimeOfDay};
use async_trait::async_trait;
use chrono::Timelike;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub project_name: String,
    pub deploy_active: bool,
    pub timer_duration_s: u64,
    pub deploy_command: Option<String>,
    pub use_llm: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AnalyticsSummary {
    pub overall_acceptance_rate: f64,
    pub recent_ignores_count: u32,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AdapterResponse {
    pub selected_task: String,
    pub reasoning: String,
    pub confidence: f64,
}

/// Pluggable LLM adapter. Production wiring hits a hosted model over
/// `reqwest`; tests substitute a canned responder.
#[async_trait]
pub trait SelectionAdapter: Send + Sync {
    async fn select(
        &self,
        tasks: &[Task],
        context: &SelectionContext,
        analytics: &AnalyticsSummary,
    ) -> anyhow::Result<AdapterResponse>;
}

#[derive(serde::Serialize)]
struct SelectionRequest<'a> {
    tasks: Vec<&'a str>,
    project_name: &'a str,
    deploy_active: bool,
    timer_duration_s: u64,
    deploy_command: Option<&'a str>,
    overall_acceptance_rate: f64,
    recent_ignores_count: u32,
    completion_rate: f64,
}

/// Calls a hosted selection endpoint (spec: `DaemonConfig::llm_adapter_endpoint`).
/// One JSON POST per call; caching and the timeout deadline live in
/// `TaskSelector`, not here.
pub struct HttpSelectionAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSelectionAdapter {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl SelectionAdapter for HttpSelectionAdapter {
    async fn select(
        &self,
        tasks: &[Task],
        context: &SelectionContext,
        analytics: &AnalyticsSummary,
    ) -> anyhow::Result<AdapterResponse> {
        let request = SelectionRequest {
            tasks: tasks.iter().map(|t| t.text.as_str()).collect(),
            project_name: &context.project_name,
            deploy_active: context.deploy_active,
            timer_duration_s: context.timer_duration_s,
            deploy_command: context.deploy_command.as_deref(),
            overall_acceptance_rate: analytics.overall_acceptance_rate,
            recent_ignores_count: analytics.recent_ignores_count,
            completion_rate: analytics.completion_rate,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?.error_for_status()?;
        Ok(response.json::<AdapterResponse>().await?)
    }
}

const LLM_DEADLINE: Duration = Duration::from_secs(10);
const MAX_PROMPT_TASKS: usize = 10;

pub struct TaskSelector {
    adapter: Option<Box<dyn SelectionAdapter>>,
    cache: Mutex<HashMap<String, AdapterResponse>>,
}

impl TaskSelector {
    pub fn new(adapter: Option<Box<dyn SelectionAdapter>>) -> Self {
        Self {
            adapter,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_llm() -> Self {
        Self::new(None)
    }

    /// Runs the full selection pipeline: filter, sort, optional LLM pass,
    /// heuristic fallback. Returns `None` if no task survives filtering.
    pub async fn select(
        &self,
        catalog: &[Task],
        context: &SelectionContext,
        analytics: &AnalyticsSummary,
        now_hour: u32,
    ) -> Option<Task> {
        let mut candidates: Vec<Task> = catalog
            .iter()
            .filter(|t| !t.completed)
            .filter(|t| !(context.deploy_active && t.tags.contains("backend")))
            .filter(|t| {
                if context.timer_duration_s <= 900 {
                    !t.tags.contains("long") && t.estimated_duration_min <= 60
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        let time_of_day = TimeOfDay::from_hour(now_hour);
        for task in candidates.iter_mut() {
            let mut adjusted = task.priority as i32;
            let is_daytime = (8..18).contains(&now_hour);
            if (task.tags.contains("creative") || task.tags.contains("design")) && !is_daytime {
                adjusted -= 1;
            }
            if task.tags.contains("research") {
                adjusted += 1;
            }
            if context.deploy_active && task.tags.contains("writing") {
                adjusted += 2;
            }
            task.priority = adjusted.clamp(1, 10) as u8;
        }
        let _ = time_of_day;

        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        if candidates.is_empty() {
            return None;
        }

        if context.use_llm {
            if let Some(adapter) = &self.adapter {
                if let Some(task) = self
                    .try_llm_select(adapter.as_ref(), &candidates, context, analytics)
                    .await
                {
                    return Some(task);
                }
            }
        }

        Some(self.heuristic_select(&candidates, context))
    }

    async fn try_llm_select(
        &self,
        adapter: &dyn SelectionAdapter,
        candidates: &[Task],
        context: &SelectionContext,
        analytics: &AnalyticsSummary,
    ) -> Option<Task> {
        let prompt_tasks: Vec<Task> = candidates.iter().take(MAX_PROMPT_TASKS).cloned().collect();
        let cache_key = cache_key(&prompt_tasks, context);

        let response = if let Some(cached) = self.cache.lock().unwrap().get(&cache_key).cloned() {
            cached
        } else {
            let result = tokio::time::timeout(
                LLM_DEADLINE,
                adapter.select(&prompt_tasks, context, analytics),
            )
            .await;
            match result {
                Ok(Ok(response)) => {
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(cache_key, response.clone());
                    response
                }
                _ => return None, // timeout or adapter error: fall through to heuristic
            }
        };

        match_selected_task(&response.selected_task, candidates)
    }

    /// `score = priority + (deploy_active ∧ #solo ? 2 : 0) +
    /// (timer_duration_s ≤ 1800 ∧ #short ? 1 : 0) + (#creative|#writing ? 1 : 0)`
    fn heuristic_select(&self, candidates: &[Task], context: &SelectionContext) -> Task {
        let mut best_idx = 0;
        let mut best_score = i32::MIN;
        for (idx, task) in candidates.iter().enumerate() {
            let mut score = task.priority as i32;
            if context.deploy_active && task.tags.contains("solo") {
                score += 2;
            }
            if context.timer_duration_s <= 1800 && task.tags.contains("short") {
                score += 1;
            }
            if task.tags.contains("creative") || task.tags.contains("writing") {
                score += 1;
            }
            if score > best_score {
                best_score = score;
                best_idx = idx;
            }
        }
        candidates[best_idx].clone()
    }
}

fn match_selected_task(selected_text: &str, candidates: &[Task]) -> Option<Task> {
    if let Some(task) = candidates.iter().find(|t| t.text == selected_text) {
        return Some(task.clone());
    }
    candidates
        .iter()
        .find(|t| t.text.contains(selected_text) || selected_text.contains(&t.text))
        .cloned()
}

fn cache_key(tasks: &[Task], context: &SelectionContext) -> String {
    let mut hasher = Sha256::new();
    for task in tasks {
        hasher.update(task.text.as_bytes());
        hasher.update(b"\0");
    }
    let mut entries = vec![
        format!("project_name={}", context.project_name),
        format!("deploy_active={}", context.deploy_active),
        format!("timer_duration_s={}", context.timer_duration_s),
        format!("deploy_command={:?}", context.deploy_command),
    ];
    entries.sort();
    for entry in entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}

pub fn current_hour() -> u32 {
    chrono::Local::now().hour()
}
