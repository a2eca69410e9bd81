//! C5 Timer Engine: one countdown per project, ticked by a single background
//! task. The start/stop/pause/resume lifecycle and the
//! broadcast-per-tick shape follow `src-tauri/src/stream_hub.rs`'s
//! `StreamHub::start`/`stop`.

use crate::model::{Timer, TimerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const TICK: std::time::Duration = std::time::Duration::from_secs(2);
const EXPIRY_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimerUpdate {
    pub project: String,
    pub status: TimerStatus,
    pub remaining_s: f64,
    pub duration_s: f64,
    pub progress_pct: f64,
    pub formatted: String,
    pub paused: bool,
    pub deploy_command: Option<String>,
}

impl TimerUpdate {
    fn from_timer(timer: &Timer, now: f64) -> Self {
        Self {
            project: timer.project.clone(),
            status: timer.status,
            remaining_s: timer.remaining_s(now),
            duration_s: timer.duration_s,
            progress_pct: timer.progress_pct(now),
            formatted: timer.formatted_remaining(now),
            paused: timer.paused,
            deploy_command: timer.deploy_command.clone(),
        }
    }
}

struct ExpiringTimer {
    timer: Timer,
    expired_at: Option<f64>,
}

pub struct TimerEngine {
    timers: Arc<Mutex<HashMap<String, ExpiringTimer>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerEngine {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            ticker: Mutex::new(None),
        }
    }

    /// Replaces any prior timer for the project.
    pub async fn start(&self, project: &str, duration_s: f64, deploy_command: Option<String>) {
        let now = now_ts();
        let timer = Timer {
            project: project.to_string(),
            start_ts: now,
            end_ts: now + duration_s,
            duration_s,
            paused: false,
            pause_started_ts: None,
            accrued_pause_s: 0.0,
            status: TimerStatus::Running,
            deploy_command,
        };
        self.timers.lock().await.insert(
            project.to_string(),
            ExpiringTimer {
                timer,
                expired_at: None,
            },
        );
    }

    /// Drops the timer outright rather than leaving a `Stopped` entry for
    /// the ticker to sweep later, matching `extend`/`pause`'s immediate
    /// feedback.
    pub async fn stop(&self, project: &str) {
        self.timers.lock().await.remove(project);
    }

    pub async fn pause(&self, project: &str) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get_mut(project) {
            Some(entry) if !entry.timer.paused && entry.timer.status == TimerStatus::Running => {
                entry.timer.paused = true;
                entry.timer.pause_started_ts = Some(now_ts());
                true
            }
            _ => false,
        }
    }

    pub async fn resume(&self, project: &str) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get_mut(project) {
            Some(entry) if entry.timer.paused => {
                let now = now_ts();
                if let Some(paused_at) = entry.timer.pause_started_ts.take() {
                    let pause_duration = now - paused_at;
                    entry.timer.end_ts += pause_duration;
                    entry.timer.accrued_pause_s += pause_duration;
                }
                entry.timer.paused = false;
                true
            }
            _ => false,
        }
    }

    pub async fn extend(&self, project: &str, delta_s: f64) -> bool {
        let mut timers = self.timers.lock().await;
        match timers.get_mut(project) {
            Some(entry) => {
                entry.timer.end_ts += delta_s;
                entry.timer.duration_s += delta_s;
                true
            }
            None => false,
        }
    }

    pub async fn get_status(&self, project: &str) -> Option<TimerUpdate> {
        let timers = self.timers.lock().await;
        timers
            .get(project)
            .map(|entry| TimerUpdate::from_timer(&entry.timer, now_ts()))
    }

    pub async fn get_all(&self) -> Vec<TimerUpdate> {
        let timers = self.timers.lock().await;
        let now = now_ts();
        timers
            .values()
            .map(|entry| TimerUpdate::from_timer(&entry.timer, now))
            .collect()
    }

    /// Spawns the single background ticker. Shuts itself down once no
    /// timers remain; a subsequent `start()` call will need `spawn_ticker`
    /// called again by the orchestrator to resume ticking.
    pub fn spawn_ticker(
        self: &Arc<Self>,
        mut on_tick: impl FnMut(TimerUpdate) + Send + 'static,
        mut on_expired: impl FnMut(String) + Send + 'static,
    ) {
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                let now = now_ts();
                let mut timers = engine.timers.lock().await;
                if timers.is_empty() {
                    break;
                }

                let mut to_remove = Vec::new();
                for (project, entry) in timers.iter_mut() {
                    if entry.timer.status == TimerStatus::Running {
                        on_tick(TimerUpdate::from_timer(&entry.timer, now));

                        if !entry.timer.paused && entry.timer.remaining_s(now) <= 0.0 {
                            entry.timer.status = TimerStatus::Expired;
                            entry.expired_at = Some(now);
                            on_expired(project.clone());
                        }
                    }
                    if let Some(expired_at) = entry.expired_at {
                        if now - expired_at >= EXPIRY_GRACE.as_secs_f64() {
                            to_remove.push(project.clone());
                        }
                    }
                }
                for project in to_remove {
                    timers.remove(&project);
                }
            }
        });
        if let Ok(mut guard) = self.ticker.try_lock() {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }
    }
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_replaces_prior_timer() {
        let engine = TimerEngine::new();
        engine.start("demo", 100.0, Some("a".into())).await;
        engine.start("demo", 200.0, Some("b".into())).await;
        let status = engine.get_status("demo").await.unwrap();
        assert_eq!(status.duration_s, 200.0);
        assert_eq!(status.deploy_command.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn pause_then_resume_shifts_end_ts_by_pause_duration() {
        let engine = TimerEngine::new();
        engine.start("demo", 100.0, None).await;
        assert!(engine.pause("demo").await);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(engine.resume("demo").await);
        let status = engine.get_status("demo").await.unwrap();
        assert!(!status.paused);
        assert!(status.remaining_s <= 100.0);
    }

    #[tokio::test]
    async fn extend_adds_to_duration_and_end_ts() {
        let engine = TimerEngine::new();
        engine.start("demo", 100.0, None).await;
        engine.extend("demo", 50.0).await;
        let status = engine.get_status("demo").await.unwrap();
        assert_eq!(status.duration_s, 150.0);
    }

    #[tokio::test]
    async fn formatted_uses_mmss_under_an_hour() {
        let engine = TimerEngine::new();
        engine.start("demo", 125.0, None).await;
        let status = engine.get_status("demo").await.unwrap();
        assert!(status.formatted.contains(':'));
        assert!(!status.formatted.starts_with("00:00:"));
    }
}
