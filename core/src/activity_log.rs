//! C1 Activity Log Sink: a bounded queue of activity entries drained onto
//! per-project `logs/activity.log` files.

use crate::error::Result;
use crate::project_registry::ProjectRegistry;
use chrono::Utc;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

const QUEUE_CAPACITY: usize = 100;
const DRAIN_TIMEOUT_S: u64 = 2;

#[derive(Debug, Clone)]
pub struct ActivityEntry {
    pub ts: chrono::DateTime<Utc>,
    /// `None` routes to the shared `system_activity.log`.
    pub project: Option<String>,
    pub event_type: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ActivityEntry {
    pub fn system(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            project: None,
            event_type: event_type.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn project(
        project: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            project: Some(project.into()),
            event_type: event_type.into(),
            message: message.into(),
            details: None,
        }
    }

    fn format_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.ts.format("%Y-%m-%d %H:%M:%S"),
            self.event_type,
            self.message
        )
    }
}

struct SinkState {
    dropped: u64,
}

/// Handle held by producers. Cloning is cheap (an `mpsc::Sender` clone); the
/// drain task is spawned once by `ActivityLogSink::start`.
#[derive(Clone)]
pub struct ActivityLogSink {
    tx: mpsc::Sender<ActivityEntry>,
    state: Arc<Mutex<SinkState>>,
}

impl ActivityLogSink {
    /// Spawns the single drain consumer and returns a handle producers can
    /// clone freely. `on_drop` is called when the bounded queue is full,
    /// matching the "never fails the producer, reports a warning instead"
    /// back-pressure policy.
    pub fn start(
        registry: Arc<ProjectRegistry>,
        mut on_drop_warning: impl FnMut(String) + Send + 'static,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        let state = Arc::new(Mutex::new(SinkState { dropped: 0 }));

        tokio::spawn(async move {
            loop {
                let recv = tokio::time::timeout(
                    std::time::Duration::from_secs(DRAIN_TIMEOUT_S),
                    rx.recv(),
                )
                .await;
                match recv {
                    Ok(Some(entry)) => {
                        if let Err(err) = write_entry(&registry, &entry).await {
                            tracing::warn!("activity log write failed: {err}");
                        }
                    }
                    Ok(None) => break, // all senders dropped
                    Err(_) => continue, // drain timeout: yield and loop again
                }
            }
        });

        let sink = Self { tx, state };
        let warn_sink = sink.clone();
        tokio::spawn(async move {
            // Poll occasionally for an accumulated drop count so the
            // producer-side `try_send` path never has to await anything.
            let mut last_reported = 0u64;
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                let dropped = warn_sink.state.lock().await.dropped;
                if dropped > last_reported {
                    on_drop_warning(format!(
                        "activity log sink dropped {} entries (queue full)",
                        dropped - last_reported
                    ));
                    last_reported = dropped;
                }
            }
        });

        sink
    }

    /// Enqueue an entry. Never blocks and never fails the caller: a full
    /// queue silently increments the drop counter.
    pub fn push(&self, entry: ActivityEntry) {
        if self.tx.try_send(entry).is_err() {
            let state = self.state.clone();
            tokio::spawn(async move {
                state.lock().await.dropped += 1;
            });
        }
    }
}

async fn write_entry(registry: &ProjectRegistry, entry: &ActivityEntry) -> Result<()> {
    let path = match &entry.project {
        Some(project) => match registry.resolve(project).await {
            Some(root) => {
                let logs_dir = root.join("logs");
                tokio::fs::create_dir_all(&logs_dir).await?;
                logs_dir.join("activity.log")
            }
            None => registry.system_log_path(),
        },
        None => registry.system_log_path(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(entry.format_line().as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_line_with_bracketed_timestamp() {
        let entry = ActivityEntry::system("DEPLOY_START", "firebase deploy detected");
        let line = entry.format_line();
        assert!(line.starts_with('['));
        assert!(line.contains("] DEPLOY_START: firebase deploy detected"));
    }
}
