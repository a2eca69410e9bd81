//! End-to-end scenarios wiring the full Orchestrator stack together, one
//! project directory at a time, exercising the flows spec.md's Orchestrator
//! section describes rather than any single module in isolation.

use deploybot_core::activity_log::ActivityLogSink;
use deploybot_core::analytics::AnalyticsStore;
use deploybot_core::config::DaemonConfig;
use deploybot_core::event_bus::EventBus;
use deploybot_core::model::{DeployEvent, SessionStatus};
use deploybot_core::notification::NotificationDispatcher;
use deploybot_core::orchestrator::{Orchestrator, ProjectPhase};
use deploybot_core::project_registry::ProjectRegistry;
use deploybot_core::timer::TimerEngine;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _config_dir: TempDir,
    _projects_root: TempDir,
    registry: Arc<ProjectRegistry>,
    analytics: Arc<AnalyticsStore>,
    timers: Arc<TimerEngine>,
    orchestrator: Orchestrator,
}

async fn harness(project: &str, todo: &str) -> Harness {
    let config_dir = TempDir::new().unwrap();
    let projects_root = TempDir::new().unwrap();
    let project_path = projects_root.path().join(project);
    tokio::fs::create_dir_all(project_path.join("logs")).await.unwrap();
    tokio::fs::write(project_path.join("config.json"), "{}").await.unwrap();
    tokio::fs::write(project_path.join("TODO.md"), todo).await.unwrap();

    let registry = Arc::new(
        ProjectRegistry::new(config_dir.path().to_path_buf(), projects_root.path().to_path_buf())
            .await
            .unwrap(),
    );
    let analytics = Arc::new(AnalyticsStore::new(registry.clone()));
    let activity_log = Arc::new(ActivityLogSink::start(registry.clone(), |_| {}));
    let timers = Arc::new(TimerEngine::new());
    let notifications = Arc::new(NotificationDispatcher::new());
    let orchestrator = Orchestrator::new(
        registry.clone(),
        analytics.clone(),
        activity_log,
        timers.clone(),
        notifications,
        EventBus::new(),
        DaemonConfig::default(),
    );

    Harness {
        _config_dir: config_dir,
        _projects_root: projects_root,
        registry,
        analytics,
        timers,
        orchestrator,
    }
}

fn start(project: &str, command: &str) -> DeployEvent {
    DeployEvent::Start {
        project: project.to_string(),
        timestamp: 0.0,
        command: command.to_string(),
        cwd: None,
    }
}

fn complete(project: &str, command: &str) -> DeployEvent {
    DeployEvent::Complete {
        project: project.to_string(),
        timestamp: 5.0,
        command: command.to_string(),
        exit_code: Some(0),
    }
}

/// Scenario 1: a deploy starts against a project with pending tasks reaches
/// the Unified phase and starts a timer in one pass.
#[tokio::test]
async fn scenario_deploy_with_tasks_unifies_timer_and_suggestion() {
    let h = harness("unify", "## Now\n- [ ] fix the flaky retry test #testing\n").await;
    h.orchestrator
        .handle_deploy_event(start("unify", "firebase deploy"))
        .await;

    assert_eq!(h.orchestrator.phase_of("unify").await, ProjectPhase::Unified);
    assert!(h.timers.get_status("unify").await.is_some());
}

/// Scenario 2: a deploy starts against a project whose TODO has no pending
/// tasks and falls through to TimerOnly with a plain deploy-detected
/// notification, never reaching Unified.
#[tokio::test]
async fn scenario_deploy_without_tasks_falls_back_to_timer_only() {
    let h = harness("empty", "## Now\n- [x] already done #writing\n").await;
    h.orchestrator
        .handle_deploy_event(start("empty", "npm run deploy"))
        .await;

    assert_eq!(h.orchestrator.phase_of("empty").await, ProjectPhase::TimerOnly);
    assert!(h.timers.get_status("empty").await.is_some());
}

/// Scenario 3: the deploy completes while the timer is still running, which
/// moves the project to Propagating without cancelling the propagation
/// timer (cloud propagation continues after the CLI returns).
#[tokio::test]
async fn scenario_deploy_complete_keeps_timer_running() {
    let h = harness("propagate", "## Now\n- [ ] review PR #code\n").await;
    h.orchestrator
        .handle_deploy_event(start("propagate", "firebase deploy"))
        .await;
    h.orchestrator
        .handle_deploy_event(complete("propagate", "firebase deploy"))
        .await;

    assert_eq!(h.orchestrator.phase_of("propagate").await, ProjectPhase::Propagating);
    assert!(h.timers.get_status("propagate").await.is_some());
}

/// Scenario 4: when the propagation timer expires, the session ends as
/// Completed and the project returns to Idle, ready for the next deploy.
#[tokio::test]
async fn scenario_timer_expiry_completes_session_and_resets_to_idle() {
    let h = harness("expire", "## Now\n- [ ] write changelog #writing\n").await;
    h.orchestrator
        .handle_deploy_event(start("expire", "firebase deploy"))
        .await;
    h.orchestrator.handle_timer_expired("expire").await;

    assert_eq!(h.orchestrator.phase_of("expire").await, ProjectPhase::Idle);
    let analytics = h.analytics.get_deploy_analytics("expire", 30).await.unwrap();
    assert_eq!(analytics.total_sessions, 1);
}

/// Scenario 5: an explicit cancel (e.g. the user dismisses the whole flow)
/// ends the session as Cancelled and stops the timer outright, unlike
/// natural expiry.
#[tokio::test]
async fn scenario_explicit_cancel_stops_timer_and_marks_cancelled() {
    let h = harness("cancelled", "## Now\n- [ ] triage bug report #code\n").await;
    h.orchestrator
        .handle_deploy_event(start("cancelled", "firebase deploy"))
        .await;
    h.orchestrator.cancel("cancelled").await;

    assert_eq!(h.orchestrator.phase_of("cancelled").await, ProjectPhase::Idle);
    assert!(h.timers.get_status("cancelled").await.is_none());
}

/// Scenario 6: a full unified-suggestion round trip, where the user accepts
/// the suggestion. The accepted interaction and the switch both land in the
/// per-project analytics before the session ends.
#[tokio::test]
async fn scenario_accepted_suggestion_records_switch_and_interaction() {
    let h = harness("accept", "## Now\n- [ ] update API docs #writing\n").await;
    let mut events = h.orchestrator.event_bus().subscribe();

    h.orchestrator
        .handle_deploy_event(start("accept", "firebase deploy"))
        .await;
    assert_eq!(h.orchestrator.phase_of("accept").await, ProjectPhase::Unified);

    let notification_id = loop {
        let envelope = events.recv().await.unwrap();
        if envelope.event == "notification.unified_suggestion" {
            break envelope.data["id"].as_str().unwrap().to_string();
        }
    };

    let handled = h
        .orchestrator
        .handle_notification_response("accept", &notification_id, "switch_now", None)
        .await;
    assert!(handled);

    let task_analytics = h
        .analytics
        .get_task_analytics("accept", None, 30)
        .await
        .unwrap();
    assert_eq!(task_analytics.suggestions_count, 1);
    assert_eq!(task_analytics.accepted, 1);

    h.orchestrator.handle_timer_expired("accept").await;
    let deploy_analytics = h.analytics.get_deploy_analytics("accept", 30).await.unwrap();
    assert_eq!(deploy_analytics.total_sessions, 1);
}
