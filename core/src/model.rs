//! Shared data model. Types here are the currency passed between
//! components; each component module owns the operations over them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// A registered project: a name bound to a filesystem path plus per-project
/// deploy/timer preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub config: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub backend_services: Vec<String>,
    #[serde(default)]
    pub deploy_commands: Vec<String>,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default)]
    pub task_mappings: std::collections::HashMap<String, String>,
    /// Any fields the distillation of this format doesn't know about are
    /// preserved here so a read-modify-write round-trips unknown data.
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default = "default_timer_duration")]
    pub default_timer: u64,
    #[serde(default, rename = "graceperiod")]
    pub grace_period_s: u64,
    #[serde(default = "default_true")]
    pub auto_redirect: bool,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub preferred_tags: Vec<String>,
    /// Preserves settings keys this build doesn't know about on round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_timer_duration() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            default_timer: default_timer_duration(),
            grace_period_s: 0,
            auto_redirect: true,
            exclude_tags: Vec::new(),
            preferred_tags: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// A parsed line from a deploy log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeployEvent {
    Start {
        project: String,
        timestamp: f64,
        command: String,
        cwd: Option<String>,
    },
    Complete {
        project: String,
        timestamp: f64,
        command: String,
        exit_code: Option<i32>,
    },
}

impl DeployEvent {
    pub fn project(&self) -> &str {
        match self {
            DeployEvent::Start { project, .. } => project,
            DeployEvent::Complete { project, .. } => project,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Running,
    Paused,
    Stopped,
    Expired,
}

/// Per-project countdown timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timer {
    pub project: String,
    pub start_ts: f64,
    pub end_ts: f64,
    pub duration_s: f64,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_started_ts: Option<f64>,
    #[serde(default)]
    pub accrued_pause_s: f64,
    pub status: TimerStatus,
    pub deploy_command: Option<String>,
}

impl Timer {
    /// `remaining_s = max(0, end_ts - now - (paused ? now - pause_started_ts : 0))`
    pub fn remaining_s(&self, now: f64) -> f64 {
        let pause_adjustment = if self.paused {
            self.pause_started_ts.map(|p| now - p).unwrap_or(0.0)
        } else {
            0.0
        };
        (self.end_ts - now - pause_adjustment).max(0.0)
    }

    pub fn progress_pct(&self, now: f64) -> f64 {
        if self.duration_s <= 0.0 {
            return 100.0;
        }
        let remaining = self.remaining_s(now);
        (100.0 * (self.duration_s - remaining) / self.duration_s).clamp(0.0, 100.0)
    }

    pub fn formatted_remaining(&self, now: f64) -> String {
        let remaining = self.remaining_s(now).round() as i64;
        let hours = remaining / 3600;
        let minutes = (remaining % 3600) / 60;
        let seconds = remaining % 60;
        if hours > 0 {
            format!("{hours:02}:{minutes:02}:{seconds:02}")
        } else {
            format!("{minutes:02}:{seconds:02}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

/// Bookkeeping envelope around one propagation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySession {
    pub session_id: String,
    pub project: String,
    pub deploy_command: String,
    pub session_start: chrono::DateTime<chrono::Utc>,
    pub session_end: Option<chrono::DateTime<chrono::Utc>>,
    pub timer_duration_s: u64,
    pub cloud_propagation_s: u64,
    #[serde(default)]
    pub tasks_suggested: u32,
    #[serde(default)]
    pub tasks_accepted: u32,
    #[serde(default)]
    pub switch_pressed: bool,
    pub switch_ts: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub estimated_time_saved_s: u64,
    pub status: SessionStatus,
    pub productivity_score: Option<f64>,
}

impl DeploySession {
    pub fn new(project: &str, command: &str, timer_duration_s: u64) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            project: project.to_string(),
            deploy_command: command.to_string(),
            session_start: chrono::Utc::now(),
            session_end: None,
            timer_duration_s,
            cloud_propagation_s: timer_duration_s,
            tasks_suggested: 0,
            tasks_accepted: 0,
            switch_pressed: false,
            switch_ts: None,
            estimated_time_saved_s: 0,
            status: SessionStatus::Active,
            productivity_score: None,
        }
    }

    /// `record_switch`: idempotent, only the first call mutates.
    pub fn record_switch(&mut self) -> bool {
        if self.switch_pressed {
            return false;
        }
        self.switch_pressed = true;
        self.switch_ts = Some(chrono::Utc::now());
        self.estimated_time_saved_s = self.cloud_propagation_s;
        true
    }

    pub fn end(&mut self, status: SessionStatus) {
        self.status = status;
        self.session_end = Some(chrono::Utc::now());
        self.productivity_score = Some(self.compute_productivity_score());
    }

    /// `0.3 + 0.3*(accepted/suggested if >0) + 0.4*switch_pressed +
    /// 0.1*(duration >= 0.5*timer_duration)`, clamped to [0,1].
    fn compute_productivity_score(&self) -> f64 {
        let mut score = 0.3;
        if self.tasks_suggested > 0 {
            score += 0.3 * (self.tasks_accepted as f64 / self.tasks_suggested as f64);
        }
        if self.switch_pressed {
            score += 0.4;
        }
        let duration_s = self
            .session_end
            .map(|end| (end - self.session_start).num_seconds().max(0) as f64)
            .unwrap_or(0.0);
        if duration_s >= 0.5 * self.timer_duration_s as f64 {
            score += 0.1;
        }
        score.clamp(0.0, 1.0)
    }
}

/// A parsed Markdown checklist item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub text: String,
    pub original_text: String,
    pub tags: BTreeSet<String>,
    pub completed: bool,
    pub section: String,
    pub line_number: usize,
    pub app: String,
    pub priority: u8,
    pub estimated_duration_min: u32,
}

/// A task suggestion emitted to the analytics store and to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub task_id: String,
    pub task_text: String,
    pub task_tags: Vec<String>,
    pub suggested_app: String,
    pub suggestion_ts: chrono::DateTime<chrono::Utc>,
    pub deploy_command: String,
    pub timer_duration_s: u64,
    pub context: SuggestionContext,
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionContext {
    pub time_of_day: String,
    pub project_type: String,
    pub recent_deploys: u32,
    pub deploy_active: bool,
    pub priority: u8,
    pub estimated_duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Accepted,
    Ignored,
    Snoozed,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMethod {
    Manual,
    TimeHeuristic,
    AppIntegration,
}

/// A user response linked to a suggestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub suggestion_id: String,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub response_time_s: f64,
    #[serde(default)]
    pub completion_detected: bool,
    pub completion_method: Option<CompletionMethod>,
    pub time_in_app_s: Option<f64>,
    pub productivity_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

/// Gives the analytics store a uniform way to window-filter the four record
/// kinds it shards by month, each of which names its timestamp field
/// differently.
pub trait Timestamped {
    fn record_ts(&self) -> chrono::DateTime<chrono::Utc>;
}

impl Timestamped for DeploySession {
    fn record_ts(&self) -> chrono::DateTime<chrono::Utc> {
        self.session_start
    }
}

impl Timestamped for Suggestion {
    fn record_ts(&self) -> chrono::DateTime<chrono::Utc> {
        self.suggestion_ts
    }
}

impl Timestamped for Interaction {
    fn record_ts(&self) -> chrono::DateTime<chrono::Utc> {
        self.ts
    }
}

/// A historical record of one deploy invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployPattern {
    pub project: String,
    pub deploy_command: String,
    pub deploy_ts: chrono::DateTime<chrono::Utc>,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    pub deploy_frequency_score: f64,
}

impl Timestamped for DeployPattern {
    fn record_ts(&self) -> chrono::DateTime<chrono::Utc> {
        self.deploy_ts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Active,
    Dismissed,
    AutoDismissed,
    Responded,
    Snoozed,
}

/// A templated, actionable notification.
/// Lifecycle state is not stored on the notification itself: the dispatcher
/// tracks it out-of-band (the `active` map versus a bounded history), so a
/// `Notification` value always represents what was created, not its current
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub template_name: String,
    pub title: String,
    pub message: String,
    pub actions: Vec<String>,
    pub category: String,
    pub data: serde_json::Value,
    pub created_ts: chrono::DateTime<chrono::Utc>,
    pub auto_dismiss_s: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_remaining_clamps_to_zero() {
        let timer = Timer {
            project: "p".into(),
            start_ts: 0.0,
            end_ts: 100.0,
            duration_s: 100.0,
            paused: false,
            pause_started_ts: None,
            accrued_pause_s: 0.0,
            status: TimerStatus::Running,
            deploy_command: None,
        };
        assert_eq!(timer.remaining_s(150.0), 0.0);
        assert_eq!(timer.remaining_s(50.0), 50.0);
    }

    #[test]
    fn timer_progress_pct_matches_formula() {
        let timer = Timer {
            project: "p".into(),
            start_ts: 0.0,
            end_ts: 100.0,
            duration_s: 100.0,
            paused: false,
            pause_started_ts: None,
            accrued_pause_s: 0.0,
            status: TimerStatus::Running,
            deploy_command: None,
        };
        assert_eq!(timer.progress_pct(25.0), 25.0);
        assert_eq!(timer.progress_pct(0.0), 0.0);
        assert_eq!(timer.progress_pct(100.0), 100.0);
    }

    #[test]
    fn session_record_switch_is_once_only() {
        let mut session = DeploySession::new("demo", "firebase deploy", 1800);
        assert!(session.record_switch());
        assert!(!session.record_switch());
        assert_eq!(session.estimated_time_saved_s, 1800);
        assert_eq!(session.tasks_accepted, 0); // not this struct's job to bump
    }

    #[test]
    fn estimated_time_saved_matches_invariant() {
        let mut unswitched = DeploySession::new("demo", "cmd", 900);
        unswitched.end(SessionStatus::Completed);
        assert_eq!(unswitched.estimated_time_saved_s, 0);

        let mut switched = DeploySession::new("demo", "cmd", 900);
        switched.record_switch();
        switched.end(SessionStatus::Completed);
        assert_eq!(switched.estimated_time_saved_s, switched.cloud_propagation_s);
    }
}
