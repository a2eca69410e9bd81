//! C11 Orchestrator: the per-project state machine wiring C4→C5,C6,C7,C9 on
//! deploy events and correlating notification actions back into C5/C8/C2.
//! Owns all per-project state behind its own async methods, the
//! single-owner-actor pattern modeled on
//! `src-tauri/src/orchestrator/engine.rs`.

use crate::analytics::AnalyticsStore;
use crate::config::DaemonConfig;
use crate::event_bus::{EnvelopeType, EventBus};
use crate::model::{DeployEvent, SessionStatus, SuggestionContext, Task, TimeOfDay};
use crate::notification::{
    action_to_interaction_kind, is_suggestion_template, AnalyticsInteractionKind,
    NotificationDispatcher, NotificationTemplate, ResponseOutcome,
};
use crate::project_registry::ProjectRegistry;
use crate::redirect::AppRedirector;
use crate::task_selector::{AnalyticsSummary, HttpSelectionAdapter, SelectionContext, TaskSelector};
use crate::{activity_log, task_catalog};
use chrono::Timelike;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectPhase {
    Idle,
    Awaiting,
    Unified,
    TimerOnly,
    Propagating,
}

struct ProjectState {
    phase: ProjectPhase,
    session_id: Option<String>,
}

impl Default for ProjectState {
    fn default() -> Self {
        Self {
            phase: ProjectPhase::Idle,
            session_id: None,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ProjectRegistry>,
    analytics: Arc<AnalyticsStore>,
    activity_log: Arc<activity_log::ActivityLogSink>,
    timers: Arc<crate::timer::TimerEngine>,
    notifications: Arc<NotificationDispatcher>,
    redirector: AppRedirector,
    selector: TaskSelector,
    bus: EventBus,
    config: DaemonConfig,
    states: Mutex<HashMap<String, ProjectState>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProjectRegistry>,
        analytics: Arc<AnalyticsStore>,
        activity_log: Arc<activity_log::ActivityLogSink>,
        timers: Arc<crate::timer::TimerEngine>,
        notifications: Arc<NotificationDispatcher>,
        bus: EventBus,
        config: DaemonConfig,
    ) -> Self {
        let selector = match &config.llm_adapter_endpoint {
            Some(endpoint) => TaskSelector::new(Some(Box::new(HttpSelectionAdapter::new(
                endpoint.clone(),
                config.llm_api_key(),
            )))),
            None => TaskSelector::without_llm(),
        };
        Self {
            registry,
            analytics,
            activity_log,
            timers,
            notifications,
            redirector: AppRedirector::new(),
            selector,
            bus,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub async fn phase_of(&self, project: &str) -> ProjectPhase {
        self.states
            .lock()
            .await
            .get(project)
            .map(|s| s.phase)
            .unwrap_or(ProjectPhase::Idle)
    }

    pub async fn handle_deploy_event(&self, event: DeployEvent) {
        match event {
            DeployEvent::Start { project, command, .. } => {
                self.on_deploy_start(&project, &command).await;
            }
            DeployEvent::Complete { project, command, .. } => {
                self.on_deploy_complete(&project, &command).await;
            }
        }
    }

    async fn on_deploy_start(&self, project: &str, command: &str) {
        self.bus.publish_event(
            EnvelopeType::System,
            "system.focus_window",
            serde_json::json!({ "project": project }),
        );

        let root = self.registry.resolve(project).await;
        let project_config = match &root {
            Some(path) => crate::project_config::load(path).await.unwrap_or_default(),
            None => Default::default(),
        };
        let duration_s = if project_config.settings.default_timer > 0 {
            project_config.settings.default_timer
        } else {
            self.config.default_timer_duration_s
        };

        let session_id = self
            .analytics
            .start_session(project, command, duration_s)
            .await;
        self.timers
            .start(project, duration_s as f64, Some(command.to_string()))
            .await;

        {
            let mut states = self.states.lock().await;
            let state = states.entry(project.to_string()).or_default();
            state.phase = ProjectPhase::Awaiting;
            state.session_id = Some(session_id.clone());
        }

        let _ = self.analytics.record_deploy_pattern(project, command).await;

        let catalog = match &root {
            Some(path) => {
                let todo_path = path.join("TODO.md");
                match tokio::fs::read_to_string(&todo_path).await {
                    Ok(content) => task_catalog::parse(&content),
                    Err(_) => Vec::new(),
                }
            }
            None => Vec::new(),
        };
        let pending: Vec<Task> = catalog.into_iter().filter(|t| !t.completed).collect();

        self.activity_log.push(activity_log::ActivityEntry::project(
            project,
            "DEPLOY_START",
            &format!("{command} detected, {} pending tasks", pending.len()),
        ));
        self.bus.publish_event(
            EnvelopeType::Deploy,
            "deploy.started",
            serde_json::json!({ "project": project, "command": command }),
        );

        if pending.is_empty() {
            self.emit_deploy_detected(project, command).await;
            self.states.lock().await.entry(project.to_string()).or_default().phase =
                ProjectPhase::TimerOnly;
            return;
        }

        let grace = self.config.grace_period_s;
        let project = project.to_string();
        let command = command.to_string();
        if grace == 0 {
            self.run_unified_suggestion(&project, &command).await;
        } else {
            // Scheduling note: a production orchestrator would spawn this
            // behind a cancel-on-transition-to-Idle guard; grace defaults to
            // 0 so the common path runs inline (Open Question, see DESIGN.md).
            tokio::time::sleep(std::time::Duration::from_secs(grace)).await;
            self.run_unified_suggestion(&project, &command).await;
        }
    }

    async fn run_unified_suggestion(&self, project: &str, command: &str) {
        self.bus.publish_event(
            EnvelopeType::System,
            "system.focus_window",
            serde_json::json!({ "project": project }),
        );

        let timer_status = self.timers.get_status(project).await;
        let root = match self.registry.resolve(project).await {
            Some(path) => path,
            None => {
                self.emit_deploy_detected(project, command).await;
                return;
            }
        };
        let catalog = match tokio::fs::read_to_string(root.join("TODO.md")).await {
            Ok(content) => task_catalog::parse(&content),
            Err(_) => Vec::new(),
        };

        let timer_duration_s = timer_status
            .as_ref()
            .map(|t| t.duration_s as u64)
            .unwrap_or(self.config.default_timer_duration_s);
        let selection_context = SelectionContext {
            project_name: project.to_string(),
            deploy_active: true,
            timer_duration_s,
            deploy_command: Some(command.to_string()),
            use_llm: true,
        };
        let now_hour = chrono::Local::now().hour();
        let analytics = self
            .analytics
            .get_task_analytics(project, None, 30)
            .await
            .map(|a| AnalyticsSummary {
                overall_acceptance_rate: a.acceptance_rate,
                recent_ignores_count: a.recent_ignores_30d,
                completion_rate: a.completion_rate,
            })
            .unwrap_or_default();

        let selected = self
            .selector
            .select(&catalog, &selection_context, &analytics, now_hour)
            .await;

        match selected {
            Some(task) => {
                self.activity_log.push(activity_log::ActivityEntry::project(
                    project,
                    "TASK_SELECTED",
                    &format!("selected '{}' for {}", task.text, task.app),
                ));

                let context = SuggestionContext {
                    time_of_day: TimeOfDay::from_hour(now_hour).as_str().to_string(),
                    project_type: "web".to_string(),
                    recent_deploys: 1,
                    deploy_active: true,
                    priority: task.priority,
                    estimated_duration: task.estimated_duration_min,
                };
                let suggestion_id = self
                    .analytics
                    .record_suggestion(&task, project, command, timer_duration_s, context)
                    .await
                    .ok();

                let session_id = self.states.lock().await.get(project).and_then(|s| s.session_id.clone());
                if let Some(session_id) = &session_id {
                    let _ = self
                        .analytics
                        .update_session_task_counts(session_id, 1, 0)
                        .await;
                }

                let data = serde_json::json!({
                    "deploy_command": command,
                    "task": { "text": task.text, "app": task.app },
                    "suggestion_id": suggestion_id,
                });
                let notification = self
                    .notifications
                    .emit(NotificationTemplate::UnifiedSuggestion, &data);
                self.bus.publish_event(
                    EnvelopeType::Notification,
                    "notification.unified_suggestion",
                    serde_json::to_value(&notification).unwrap_or_default(),
                );
                self.bus.publish_event(
                    EnvelopeType::Task,
                    "task.unified_suggested",
                    serde_json::json!({ "project": project, "task": task.text }),
                );

                let mut states = self.states.lock().await;
                states.entry(project.to_string()).or_default().phase = ProjectPhase::Unified;
            }
            None => {
                self.emit_deploy_detected(project, command).await;
                let mut states = self.states.lock().await;
                states.entry(project.to_string()).or_default().phase = ProjectPhase::TimerOnly;
            }
        }
    }

    async fn emit_deploy_detected(&self, project: &str, command: &str) {
        let notification = self.notifications.emit(
            NotificationTemplate::DeployDetected,
            &serde_json::json!({ "deploy_command": command }),
        );
        self.bus.publish_event(
            EnvelopeType::Notification,
            "notification.deploy_detected",
            serde_json::to_value(&notification).unwrap_or_default(),
        );
        let _ = project;
    }

    async fn on_deploy_complete(&self, project: &str, command: &str) {
        self.activity_log.push(activity_log::ActivityEntry::project(
            project,
            "DEPLOY_COMPLETE",
            command,
        ));
        self.bus.publish_event(
            EnvelopeType::Deploy,
            "deploy.deploy_completed",
            serde_json::json!({ "project": project, "command": command }),
        );
        let notification = self.notifications.emit(
            NotificationTemplate::DeployCompleted,
            &serde_json::json!({ "deploy_command": command }),
        );
        self.bus.publish_event(
            EnvelopeType::Notification,
            "notification.deploy_completed",
            serde_json::to_value(&notification).unwrap_or_default(),
        );

        let mut states = self.states.lock().await;
        let state = states.entry(project.to_string()).or_default();
        // Cloud propagation continues: the timer is not stopped here.
        state.phase = ProjectPhase::Propagating;
    }

    pub async fn handle_timer_expired(&self, project: &str) {
        let notification = self
            .notifications
            .emit(NotificationTemplate::TimerExpiry, &serde_json::json!({}));
        self.bus.publish_event(
            EnvelopeType::Notification,
            "notification.timer_expiry",
            serde_json::to_value(&notification).unwrap_or_default(),
        );

        let session_id = {
            let mut states = self.states.lock().await;
            let state = states.entry(project.to_string()).or_default();
            let session_id = state.session_id.take();
            state.phase = ProjectPhase::Idle;
            session_id
        };
        if let Some(session_id) = session_id {
            let _ = self
                .analytics
                .end_session(&session_id, SessionStatus::Completed)
                .await;
        }
    }

    pub async fn cancel(&self, project: &str) {
        let session_id = {
            let mut states = self.states.lock().await;
            let state = states.entry(project.to_string()).or_default();
            let session_id = state.session_id.take();
            state.phase = ProjectPhase::Idle;
            session_id
        };
        if let Some(session_id) = session_id {
            let _ = self
                .analytics
                .end_session(&session_id, SessionStatus::Cancelled)
                .await;
        }
        self.timers.stop(project).await;
    }

    /// Handles a `notification-response`/`notification-action` command
    ///.
    pub async fn handle_notification_response(
        &self,
        project: &str,
        notification_id: &str,
        action: &str,
        extra: Option<&serde_json::Value>,
    ) -> bool {
        let Some(notification) = self.notifications.get_active(notification_id) else {
            return false;
        };
        let Some((response_time_s, outcome)) =
            self.notifications.respond(notification_id, action, extra)
        else {
            return false;
        };

        if is_suggestion_template(&notification.template_name) {
            if let Some(suggestion_id) = notification
                .data
                .get("suggestion_id")
                .and_then(|v| v.as_str())
            {
                let kind = match action_to_interaction_kind(action) {
                    AnalyticsInteractionKind::Accepted => crate::model::InteractionType::Accepted,
                    AnalyticsInteractionKind::Snoozed => crate::model::InteractionType::Snoozed,
                    AnalyticsInteractionKind::Dismissed => crate::model::InteractionType::Dismissed,
                    AnalyticsInteractionKind::Ignored => crate::model::InteractionType::Ignored,
                };
                let _ = self
                    .analytics
                    .record_interaction(suggestion_id, kind, response_time_s, project, None)
                    .await;
            }
        }

        match outcome {
            ResponseOutcome::SwitchNow => {
                let session_id = self.states.lock().await.get(project).and_then(|s| s.session_id.clone());
                if let Some(session_id) = session_id {
                    let _ = self.analytics.record_switch(&session_id).await;
                    let _ = self
                        .analytics
                        .update_session_task_counts(&session_id, 0, 1)
                        .await;
                }
                if let Some(task) = notification.data.get("task") {
                    if let (Some(text), Some(app)) = (
                        task.get("text").and_then(|v| v.as_str()),
                        task.get("app").and_then(|v| v.as_str()),
                    ) {
                        if let Some(root) = self.registry.resolve(project).await {
                            let redirect_task = Task {
                                id: "redirect".into(),
                                text: text.to_string(),
                                original_text: text.to_string(),
                                tags: Default::default(),
                                completed: false,
                                section: String::new(),
                                line_number: 0,
                                app: app.to_string(),
                                priority: 5,
                                estimated_duration_min: 30,
                            };
                            let result = self.redirector.redirect(&redirect_task, &root).await;
                            self.bus.publish_event(
                                EnvelopeType::Task,
                                "task.redirection_result",
                                serde_json::to_value(&result).unwrap_or_default(),
                            );
                        }
                    }
                }
            }
            ResponseOutcome::SnoozeExplicit { resend_after_s, .. } => {
                let dispatcher = self.notifications.clone();
                let bus = self.bus.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(resend_after_s)).await;
                    let resent = dispatcher.resnooze(&notification);
                    bus.publish_event(
                        EnvelopeType::Notification,
                        "notification.snooze_reminder",
                        serde_json::to_value(&resent).unwrap_or_default(),
                    );
                });
            }
            ResponseOutcome::StartNewTimer { duration_s } => {
                self.timers.start(project, duration_s as f64, None).await;
            }
            ResponseOutcome::Dropped => {}
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity_log::ActivityLogSink;
    use tempfile::tempdir;

    async fn setup(name: &str) -> (tempfile::TempDir, tempfile::TempDir, Orchestrator) {
        let config_dir = tempdir().unwrap();
        let projects_root = tempdir().unwrap();
        let project_path = projects_root.path().join(name);
        tokio::fs::create_dir_all(&project_path).await.unwrap();
        tokio::fs::write(project_path.join("config.json"), "{}").await.unwrap();
        tokio::fs::write(
            project_path.join("TODO.md"),
            "## Now\n- [ ] write release notes #writing\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            project_path.join("logs").join("deploy_log.txt"),
            "",
        )
        .await
        .ok();

        let registry = Arc::new(
            ProjectRegistry::new(config_dir.path().to_path_buf(), projects_root.path().to_path_buf())
                .await
                .unwrap(),
        );
        let analytics = Arc::new(AnalyticsStore::new(registry.clone()));
        let activity_log = Arc::new(ActivityLogSink::start(registry.clone(), |_| {}));
        let timers = Arc::new(crate::timer::TimerEngine::new());
        let notifications = Arc::new(NotificationDispatcher::new());
        let orchestrator = Orchestrator::new(
            registry,
            analytics,
            activity_log,
            timers,
            notifications,
            EventBus::new(),
            DaemonConfig::default(),
        );
        (config_dir, projects_root, orchestrator)
    }

    #[tokio::test]
    async fn deploy_start_with_tasks_reaches_unified_phase() {
        let (_c, _p, orchestrator) = setup("demo").await;
        orchestrator
            .handle_deploy_event(DeployEvent::Start {
                project: "demo".into(),
                timestamp: 0.0,
                command: "firebase deploy".into(),
                cwd: None,
            })
            .await;
        assert_eq!(orchestrator.phase_of("demo").await, ProjectPhase::Unified);
    }

    #[tokio::test]
    async fn deploy_complete_moves_to_propagating_without_stopping_timer() {
        let (_c, _p, orchestrator) = setup("demo").await;
        orchestrator
            .handle_deploy_event(DeployEvent::Start {
                project: "demo".into(),
                timestamp: 0.0,
                command: "firebase deploy".into(),
                cwd: None,
            })
            .await;
        orchestrator
            .handle_deploy_event(DeployEvent::Complete {
                project: "demo".into(),
                timestamp: 1.0,
                command: "firebase deploy".into(),
                exit_code: Some(0),
            })
            .await;
        assert_eq!(orchestrator.phase_of("demo").await, ProjectPhase::Propagating);
        assert!(orchestrator.timers.get_status("demo").await.is_some());
    }

    #[tokio::test]
    async fn timer_expired_ends_session_and_returns_to_idle() {
        let (_c, _p, orchestrator) = setup("demo").await;
        orchestrator
            .handle_deploy_event(DeployEvent::Start {
                project: "demo".into(),
                timestamp: 0.0,
                command: "firebase deploy".into(),
                cwd: None,
            })
            .await;
        orchestrator.handle_timer_expired("demo").await;
        assert_eq!(orchestrator.phase_of("demo").await, ProjectPhase::Idle);
    }
}
