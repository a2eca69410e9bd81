//! C10 Client Gateway: the transport half of the event bus. Serves the
//! command/push wire protocol over `axum`, generalizing
//! `tandem-server`'s `WebSocketUpgrade`-based PTY stream
//! (`crates/tandem-server/src/http.rs::pty_ws`) from a one-way byte stream
//! to a bidirectional command/push envelope protocol.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use deploybot_core::analytics::AnalyticsStore;
use deploybot_core::deploy_monitor::DeployMonitor;
use deploybot_core::event_bus::{Envelope, EnvelopeType};
use deploybot_core::model::{DeployEvent, Task};
use deploybot_core::orchestrator::Orchestrator;
use deploybot_core::project_registry::ProjectRegistry;
use deploybot_core::redirect::AppRedirector;
use deploybot_core::task_catalog;
use deploybot_core::timer::TimerEngine;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ProjectRegistry>,
    pub analytics: Arc<AnalyticsStore>,
    pub timers: Arc<TimerEngine>,
    pub monitor: Arc<DeployMonitor>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct ClientCommand {
    command: String,
    #[serde(default)]
    data: serde_json::Value,
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sink, mut stream) = futures::StreamExt::split(socket);
    let mut rx = state.orchestrator.event_bus().subscribe();
    info!("client connected");

    let monitored = state.monitor.watched_projects().await;
    let connected = Envelope::new(
        EnvelopeType::System,
        "system.connected",
        serde_json::json!({ "monitored_projects": monitored }),
    );
    if send_envelope(&mut sink, &connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            push = rx.recv() => {
                match push {
                    Ok(envelope) => {
                        if send_envelope(&mut sink, &envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "client fell behind the event bus");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = futures::StreamExt::next(&mut stream) => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let response = dispatch_text(&state, &text).await;
                        if send_envelope(&mut sink, &response).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    info!("client disconnected");
    // Subscriber drops its receiver on scope exit: removal is idempotent by
    // construction (broadcast receiver_count just decrements).
}

async fn send_envelope(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    envelope: &Envelope,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(envelope).unwrap_or_default();
    futures::SinkExt::send(sink, Message::Text(payload.into())).await
}

async fn dispatch_text(state: &GatewayState, text: &str) -> Envelope {
    let parsed: Result<ClientCommand, _> = serde_json::from_str(text);
    let command = match parsed {
        Ok(c) => c,
        Err(err) => return Envelope::error(format!("invalid command payload: {err}")),
    };

    let result = dispatch_command(state, &command.command, &command.data).await;
    match result {
        Ok(data) => Envelope::response(&command.command, data),
        Err(message) => Envelope::response(
            &command.command,
            serde_json::json!({ "success": false, "message": message }),
        ),
    }
}

async fn dispatch_command(
    state: &GatewayState,
    command: &str,
    data: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    match command {
        "ping" => Ok(serde_json::json!({ "pong": true })),

        "status" => {
            let monitored = state.monitor.watched_projects().await;
            let timers = state.timers.get_all().await;
            Ok(serde_json::json!({
                "monitored_projects": monitored,
                "active_timers": timers,
                "subscriber_count": state.orchestrator.event_bus().subscriber_count(),
            }))
        }

        "start-monitoring" => {
            let project = require_str(data, "project")?;
            let path = state
                .registry
                .resolve(project)
                .await
                .ok_or_else(|| format!("unknown project: {project}"))?;
            let log_path = data
                .get("deploy_log_path")
                .and_then(|v| v.as_str())
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|| path.join("logs").join("deploy_log.txt"));
            state.monitor.attach(project, log_path).await;
            Ok(serde_json::json!({ "success": true }))
        }

        "stop-monitoring" => {
            let project = require_str(data, "project")?;
            state.monitor.detach(project).await;
            Ok(serde_json::json!({ "success": true }))
        }

        "check-monitor" => {
            let project = require_str(data, "project")?;
            Ok(serde_json::json!({ "monitoring": state.monitor.is_monitoring(project).await }))
        }

        "direct-add-to-monitoring" => {
            let project = require_str(data, "project")?;
            let path_str = require_str(data, "path")?;
            let path = std::path::PathBuf::from(path_str);
            state
                .registry
                .add(project, path.clone())
                .await
                .map_err(|e| e.to_string())?;
            state
                .monitor
                .attach(project, path.join("logs").join("deploy_log.txt"))
                .await;
            Ok(serde_json::json!({ "success": true }))
        }

        "project-create" => {
            let name = require_str(data, "name")?;
            let path_str = require_str(data, "path")?;
            let path = std::path::PathBuf::from(path_str);
            tokio::fs::create_dir_all(&path).await.map_err(|e| e.to_string())?;
            let config_path = path.join("config.json");
            if !config_path.exists() {
                tokio::fs::write(&config_path, "{}").await.map_err(|e| e.to_string())?;
            }
            let todo_path = path.join("TODO.md");
            if !todo_path.exists() {
                tokio::fs::write(&todo_path, "## Now\n").await.map_err(|e| e.to_string())?;
            }
            state.registry.add(name, path).await.map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "success": true }))
        }

        "project-list" => {
            let projects = state.registry.list_all().await;
            Ok(serde_json::json!({
                "projects": projects.into_iter()
                    .map(|(name, path)| serde_json::json!({ "name": name, "path": path }))
                    .collect::<Vec<_>>()
            }))
        }

        "project-delete" => {
            let name = require_str(data, "name")?;
            state.registry.remove(name).await.map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "success": true }))
        }

        "project-load" => {
            let name = require_str(data, "name")?;
            let path = state
                .registry
                .resolve(name)
                .await
                .ok_or_else(|| format!("unknown project: {name}"))?;
            let config = deploybot_core::project_config::load(&path)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::json!({ "path": path, "config": config }))
        }

        // The deploy-wrapper helper and shell-alias installer are external
        // collaborators; the core only reports status.
        "wrapper-status" => Ok(serde_json::json!({
            "installed": false,
            "note": "deploy wrapper installation is managed outside the core",
        })),
        "wrapper-install" | "wrapper-uninstall" => Ok(serde_json::json!({
            "success": false,
            "message": "wrapper installation is not managed by the core",
        })),

        "timer-start" => {
            let project = require_str(data, "project")?;
            let duration_s = data.get("duration_s").and_then(|v| v.as_f64()).unwrap_or(1800.0);
            let deploy_command = data
                .get("deploy_command")
                .and_then(|v| v.as_str())
                .map(String::from);
            state.timers.start(project, duration_s, deploy_command).await;
            Ok(serde_json::json!({ "success": true }))
        }

        "timer-stop" => {
            let project = require_str(data, "project")?;
            state.timers.stop(project).await;
            Ok(serde_json::json!({ "success": true }))
        }

        "timer-status" => {
            let project = require_str(data, "project")?;
            match state.timers.get_status(project).await {
                Some(status) => Ok(serde_json::to_value(status).unwrap_or_default()),
                None => Err(format!("no timer for project: {project}")),
            }
        }

        "simulate-deploy" => {
            let project = require_str(data, "project")?;
            let deploy_command = data
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("firebase deploy")
                .to_string();
            state
                .orchestrator
                .handle_deploy_event(DeployEvent::Start {
                    project: project.to_string(),
                    timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
                    command: deploy_command,
                    cwd: None,
                })
                .await;
            Ok(serde_json::json!({ "success": true }))
        }

        "get-task-suggestions" => {
            let project = require_str(data, "project")?;
            let path = state
                .registry
                .resolve(project)
                .await
                .ok_or_else(|| format!("unknown project: {project}"))?;
            let catalog = match tokio::fs::read_to_string(path.join("TODO.md")).await {
                Ok(content) => task_catalog::parse(&content),
                Err(_) => Vec::new(),
            };
            let mut pending: Vec<Task> = catalog.into_iter().filter(|t| !t.completed).collect();
            pending.sort_by(|a, b| b.priority.cmp(&a.priority));
            pending.truncate(10);
            Ok(serde_json::json!({ "tasks": pending }))
        }

        "redirect-to-task" => {
            let project = require_str(data, "project")?;
            let path = state
                .registry
                .resolve(project)
                .await
                .ok_or_else(|| format!("unknown project: {project}"))?;
            let text = require_str(data, "task_text")?.to_string();
            let app = data.get("app").and_then(|v| v.as_str()).unwrap_or("Notion").to_string();
            let task = Task {
                id: "redirect".into(),
                text,
                original_text: String::new(),
                tags: BTreeSet::new(),
                completed: false,
                section: String::new(),
                line_number: 0,
                app,
                priority: 5,
                estimated_duration_min: 30,
            };
            let result = AppRedirector::new().redirect(&task, &path).await;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }

        "notification-response" | "notification-action" => {
            let project = require_str(data, "project")?;
            let notification_id = require_str(data, "notification_id")?;
            let action = require_str(data, "action")?;
            let handled = state
                .orchestrator
                .handle_notification_response(project, notification_id, action, data.get("extra"))
                .await;
            if handled {
                Ok(serde_json::json!({ "success": true }))
            } else {
                Err(format!("unknown notification: {notification_id}"))
            }
        }

        "get-logs" => {
            let project = require_str(data, "project")?;
            let lines = data.get("lines").and_then(|v| v.as_u64()).unwrap_or(100) as usize;
            let path = state
                .registry
                .resolve(project)
                .await
                .map(|p| p.join("logs").join("activity.log"));
            let content = match path {
                Some(path) => tokio::fs::read_to_string(&path).await.unwrap_or_default(),
                None => String::new(),
            };
            let tail: Vec<&str> = content.lines().rev().take(lines).collect();
            Ok(serde_json::json!({ "lines": tail.into_iter().rev().collect::<Vec<_>>() }))
        }

        other => Err(format!("Unknown command: {other}")),
    }
}

fn require_str<'a>(data: &'a serde_json::Value, field: &str) -> Result<&'a str, String> {
    data.get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing required field: {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_command_reports_contract_message() {
        let config_dir = tempfile::tempdir().unwrap();
        let projects_root = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            ProjectRegistry::new(config_dir.path().to_path_buf(), projects_root.path().to_path_buf())
                .await
                .unwrap(),
        );
        let analytics = Arc::new(AnalyticsStore::new(registry.clone()));
        let activity_log = Arc::new(deploybot_core::activity_log::ActivityLogSink::start(
            registry.clone(),
            |_| {},
        ));
        let timers = Arc::new(TimerEngine::new());
        let notifications = Arc::new(deploybot_core::notification::NotificationDispatcher::new());
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            analytics.clone(),
            activity_log,
            timers.clone(),
            notifications,
            deploybot_core::event_bus::EventBus::new(),
            deploybot_core::config::DaemonConfig::default(),
        ));
        let state = GatewayState {
            orchestrator,
            registry,
            analytics,
            timers,
            monitor: Arc::new(DeployMonitor::new()),
        };

        let err = dispatch_command(&state, "not-a-command", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("Unknown command"));
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let config_dir = tempfile::tempdir().unwrap();
        let projects_root = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            ProjectRegistry::new(config_dir.path().to_path_buf(), projects_root.path().to_path_buf())
                .await
                .unwrap(),
        );
        let analytics = Arc::new(AnalyticsStore::new(registry.clone()));
        let activity_log = Arc::new(deploybot_core::activity_log::ActivityLogSink::start(
            registry.clone(),
            |_| {},
        ));
        let timers = Arc::new(TimerEngine::new());
        let notifications = Arc::new(deploybot_core::notification::NotificationDispatcher::new());
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            analytics.clone(),
            activity_log,
            timers.clone(),
            notifications,
            deploybot_core::event_bus::EventBus::new(),
            deploybot_core::config::DaemonConfig::default(),
        ));
        let state = GatewayState {
            orchestrator,
            registry,
            analytics,
            timers,
            monitor: Arc::new(DeployMonitor::new()),
        };

        let result = dispatch_command(&state, "ping", &serde_json::json!({})).await.unwrap();
        assert_eq!(result["pong"], true);
    }
}
