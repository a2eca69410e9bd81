//! C9 Notification Dispatcher: a fixed template table plus a bounded ring of
//! recent notifications, matching the ring-buffer shape of
//! `src-tauri/src/logs.rs::LogRingBuffer`.

use crate::model::Notification;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTemplate {
    DeployDetected,
    TaskSuggestion,
    TimerExpiry,
    DeployCompleted,
    UnifiedSuggestion,
}

impl NotificationTemplate {
    fn name(self) -> &'static str {
        match self {
            Self::DeployDetected => "deploy_detected",
            Self::TaskSuggestion => "task_suggestion",
            Self::TimerExpiry => "timer_expiry",
            Self::DeployCompleted => "deploy_completed",
            Self::UnifiedSuggestion => "unified_suggestion",
        }
    }

    fn definition(self) -> TemplateDefinition {
        match self {
            Self::DeployDetected => TemplateDefinition {
                title: "Deploy detected",
                message: "Deploy started: {deploy_command}",
                actions: &["view_timer", "dismiss"],
                category: "deploy",
                auto_dismiss_s: 0,
            },
            Self::TaskSuggestion => TemplateDefinition {
                title: "While you wait",
                message: "Try: {task_text} ({task_app})",
                actions: &["switch_now", "snooze_5min", "dismiss"],
                category: "suggestion",
                auto_dismiss_s: 300,
            },
            Self::TimerExpiry => TemplateDefinition {
                title: "Propagation window closed",
                message: "Your deploy should be live now.",
                actions: &["view_logs", "dismiss"],
                category: "timer",
                auto_dismiss_s: 0,
            },
            Self::DeployCompleted => TemplateDefinition {
                title: "Deploy completed",
                message: "{deploy_command} finished.",
                actions: &["view_logs", "dismiss"],
                category: "deploy",
                auto_dismiss_s: 60,
            },
            Self::UnifiedSuggestion => TemplateDefinition {
                title: "Deploy in progress",
                message: "While {deploy_command} propagates, try: {task_text} ({task_app})",
                actions: &["switch_now", "switch_to_task", "snooze_10min", "dismiss"],
                category: "suggestion",
                auto_dismiss_s: 300,
            },
        }
    }
}

struct TemplateDefinition {
    title: &'static str,
    message: &'static str,
    actions: &'static [&'static str],
    category: &'static str,
    auto_dismiss_s: u64,
}

/// What `respond()` should do with the notification: always removed from
/// `active` unless the action was a snooze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    SwitchNow,
    SnoozeExplicit { remove_id: String, resend_after_s: u64 },
    StartNewTimer { duration_s: u64 },
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsInteractionKind {
    Accepted,
    Snoozed,
    Dismissed,
    Ignored,
}

/// Maps a raw action string to the analytics interaction type.
pub fn action_to_interaction_kind(action: &str) -> AnalyticsInteractionKind {
    if action == "switch_now" || action == "switch_to_task" {
        AnalyticsInteractionKind::Accepted
    } else if action.starts_with("snooze") {
        AnalyticsInteractionKind::Snoozed
    } else if action == "dismiss" {
        AnalyticsInteractionKind::Dismissed
    } else {
        AnalyticsInteractionKind::Ignored
    }
}

pub fn is_suggestion_template(template_name: &str) -> bool {
    template_name == "task_suggestion" || template_name == "unified_suggestion"
}

pub struct NotificationDispatcher {
    active: Mutex<HashMap<String, Notification>>,
    history: Mutex<VecDeque<Notification>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Builds and records a notification. Fan-out to the event bus and
    /// platform channels is the caller's responsibility (the orchestrator
    /// holds the event bus handle); this dispatcher owns formatting and
    /// lifecycle bookkeeping only.
    pub fn emit(&self, template: NotificationTemplate, data: &serde_json::Value) -> Notification {
        let definition = template.definition();
        let title = substitute(definition.title, data);
        let message = substitute(definition.message, data);

        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            template_name: template.name().to_string(),
            title,
            message,
            actions: definition.actions.iter().map(|a| a.to_string()).collect(),
            category: definition.category.to_string(),
            data: data.clone(),
            created_ts: Utc::now(),
            auto_dismiss_s: definition.auto_dismiss_s,
        };

        self.active
            .lock()
            .unwrap()
            .insert(notification.id.clone(), notification.clone());
        let mut history = self.history.lock().unwrap();
        history.push_back(notification.clone());
        if history.len() > HISTORY_CAPACITY {
            history.pop_front();
        }

        notification
    }

    pub fn get_active(&self, id: &str) -> Option<Notification> {
        self.active.lock().unwrap().get(id).cloned()
    }

    pub fn history(&self) -> Vec<Notification> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// Computes `response_time_s` and decides the follow-up action; removes
    /// the notification from `active` unless it was a snooze.
    pub fn respond(
        &self,
        id: &str,
        action: &str,
        extra: Option<&serde_json::Value>,
    ) -> Option<(f64, ResponseOutcome)> {
        let notification = self.active.lock().unwrap().get(id).cloned()?;
        let response_time_s = (Utc::now() - notification.created_ts).num_milliseconds() as f64 / 1000.0;

        let outcome = if action == "switch_now" || action == "switch_to_task" {
            self.active.lock().unwrap().remove(id);
            ResponseOutcome::SwitchNow
        } else if let Some(minutes) = snooze_minutes(action, extra) {
            self.active.lock().unwrap().remove(id);
            ResponseOutcome::SnoozeExplicit {
                remove_id: id.to_string(),
                resend_after_s: minutes * 60,
            }
        } else if action == "start_new_timer" {
            self.active.lock().unwrap().remove(id);
            let duration_s = extra
                .and_then(|e| e.get("duration"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1800);
            ResponseOutcome::StartNewTimer { duration_s }
        } else {
            self.active.lock().unwrap().remove(id);
            ResponseOutcome::Dropped
        };

        Some((response_time_s, outcome))
    }

    /// Builds the resent notification for a snooze, suffixing the message
    /// once; never suffixes twice.
    pub fn resnooze(&self, original: &Notification) -> Notification {
        let suffix = " (Reminder)";
        let message = if original.message.ends_with(suffix) {
            original.message.clone()
        } else {
            format!("{}{suffix}", original.message)
        };

        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            template_name: original.template_name.clone(),
            title: original.title.clone(),
            message,
            actions: original.actions.clone(),
            category: original.category.clone(),
            data: original.data.clone(),
            created_ts: Utc::now(),
            auto_dismiss_s: original.auto_dismiss_s,
        };

        self.active
            .lock()
            .unwrap()
            .insert(notification.id.clone(), notification.clone());
        notification
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn snooze_minutes(action: &str, extra: Option<&serde_json::Value>) -> Option<u64> {
    match action {
        "snooze_5min" => Some(5),
        "snooze_10min" => Some(10),
        "snooze" => extra
            .and_then(|e| e.get("minutes"))
            .and_then(|v| v.as_u64())
            .or(Some(5)),
        _ => None,
    }
}

/// Flattened `data` substitution: dotted names become underscored; `task`
/// objects expose `task_text`/`task_app`.
fn substitute(template: &str, data: &serde_json::Value) -> String {
    let mut result = template.to_string();
    let mut flat = HashMap::new();
    flatten(data, "", &mut flat);
    for (key, value) in flat {
        result = result.replace(&format!("{{{key}}}"), &value);
    }
    result
}

fn flatten(value: &serde_json::Value, prefix: &str, out: &mut HashMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}_{k}")
                };
                flatten(v, &key, out);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_substitutes_task_fields() {
        let dispatcher = NotificationDispatcher::new();
        let data = serde_json::json!({
            "deploy_command": "firebase deploy",
            "task": { "text": "write docs", "app": "Bear" },
        });
        let notification = dispatcher.emit(NotificationTemplate::UnifiedSuggestion, &data);
        assert!(notification.message.contains("write docs"));
        assert!(notification.message.contains("Bear"));
        assert!(notification.message.contains("firebase deploy"));
    }

    #[test]
    fn respond_with_switch_now_removes_from_active() {
        let dispatcher = NotificationDispatcher::new();
        let notification = dispatcher.emit(NotificationTemplate::TaskSuggestion, &serde_json::json!({}));
        assert!(dispatcher.get_active(&notification.id).is_some());
        let (_, outcome) = dispatcher.respond(&notification.id, "switch_now", None).unwrap();
        assert_eq!(outcome, ResponseOutcome::SwitchNow);
        assert!(dispatcher.get_active(&notification.id).is_none());
    }

    #[test]
    fn resnooze_suffixes_reminder_only_once() {
        let dispatcher = NotificationDispatcher::new();
        let notification = dispatcher.emit(NotificationTemplate::TaskSuggestion, &serde_json::json!({}));
        let first = dispatcher.resnooze(&notification);
        assert!(first.message.ends_with(" (Reminder)"));
        let second = dispatcher.resnooze(&first);
        assert_eq!(second.message.matches("(Reminder)").count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let dispatcher = NotificationDispatcher::new();
        for _ in 0..(HISTORY_CAPACITY + 10) {
            dispatcher.emit(NotificationTemplate::DeployDetected, &serde_json::json!({}));
        }
        assert_eq!(dispatcher.history().len(), HISTORY_CAPACITY);
    }

    #[test]
    fn action_mapping_matches_spec_table() {
        assert_eq!(action_to_interaction_kind("switch_now"), AnalyticsInteractionKind::Accepted);
        assert_eq!(action_to_interaction_kind("snooze_5min"), AnalyticsInteractionKind::Snoozed);
        assert_eq!(action_to_interaction_kind("dismiss"), AnalyticsInteractionKind::Dismissed);
        assert_eq!(action_to_interaction_kind("view_logs"), AnalyticsInteractionKind::Ignored);
    }
}
