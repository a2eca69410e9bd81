//! C4 Deploy Log Monitor: tails a set of `(project, deploy_log_path)` pairs
//! plus a global fallback log, parsing `DEPLOY`/`DEPLOY_COMPLETE` lines.
//! Byte-offset tracking follows the `tail_file` shape of
//! `src-tauri/src/logs.rs`, generalized to a persistent per-path map instead
//! of a fixed tail window.

use crate::error::Result;
use crate::model::DeployEvent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const TICK: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone)]
struct WatchedLog {
    project: String,
    path: PathBuf,
}

struct MonitorState {
    watched: Vec<WatchedLog>,
    last_position: HashMap<PathBuf, u64>,
}

/// Watches deploy log files and emits parsed `DeployEvent`s through a
/// caller-supplied sink closure. Holds its own background tick task; `stop`
/// cancels it and releases file handles.
pub struct DeployMonitor {
    state: Arc<Mutex<MonitorState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeployMonitor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                watched: Vec::new(),
                last_position: HashMap::new(),
            })),
            handle: Mutex::new(None),
        }
    }

    /// Attaches a path for monitoring. `last_position` starts at the
    /// current file size so historical content is never re-played; a
    /// not-yet-created file starts at position 0.
    pub async fn attach(&self, project: &str, path: PathBuf) {
        let size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let mut state = self.state.lock().await;
        state.last_position.insert(path.clone(), size);
        state.watched.push(WatchedLog {
            project: project.to_string(),
            path,
        });
    }

    pub async fn detach(&self, project: &str) {
        let mut state = self.state.lock().await;
        state.watched.retain(|w| w.project != project);
    }

    pub async fn is_monitoring(&self, project: &str) -> bool {
        self.state
            .lock()
            .await
            .watched
            .iter()
            .any(|w| w.project == project)
    }

    pub async fn watched_projects(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .watched
            .iter()
            .map(|w| w.project.clone())
            .collect()
    }

    /// Spawns the tick task. `on_event` is called for every parsed event;
    /// `on_warn` for unparseable lines (logged, not fatal).
    pub fn start(
        self: &Arc<Self>,
        mut on_event: impl FnMut(DeployEvent) + Send + 'static,
        mut on_warn: impl FnMut(String) + Send + 'static,
    ) {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                interval.tick().await;
                let watched = monitor.state.lock().await.watched.clone();
                for log in watched {
                    match monitor.poll_one(&log).await {
                        Ok(lines) => {
                            for line in lines {
                                match parse_deploy_line(&log.project, &line) {
                                    Ok(Some(event)) => on_event(event),
                                    Ok(None) => {}
                                    Err(message) => on_warn(message),
                                }
                            }
                        }
                        Err(err) => on_warn(format!("{}: {err}", log.path.display())),
                    }
                }
            }
        });
        // Replace, don't leak: calling start() twice cancels the prior task.
        let state = self.handle.try_lock();
        if let Ok(mut guard) = state {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn poll_one(&self, log: &WatchedLog) -> Result<Vec<String>> {
        let metadata = match tokio::fs::metadata(&log.path).await {
            Ok(m) => m,
            Err(_) => return Ok(Vec::new()), // not created yet; retried next tick
        };
        let size = metadata.len();

        let mut state = self.state.lock().await;
        let last = *state.last_position.get(&log.path).unwrap_or(&0);
        if size <= last {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&log.path).await?;
        file.seek(std::io::SeekFrom::Start(last)).await?;
        let mut buf = Vec::with_capacity((size - last) as usize);
        file.read_to_end(&mut buf).await?;
        state.last_position.insert(log.path.clone(), size);
        drop(state);

        let text = String::from_utf8_lossy(&buf);
        Ok(text
            .lines()
            .map(|l| l.to_string())
            .filter(|l| !l.trim().is_empty())
            .collect())
    }
}

impl Default for DeployMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_deploy_line(project: &str, line: &str) -> std::result::Result<Option<DeployEvent>, String> {
    let Some((ts_str, rest)) = line.split_once(' ') else {
        return Err(format!("unparseable deploy line: {line}"));
    };
    let timestamp: f64 = ts_str
        .parse()
        .map_err(|_| format!("bad timestamp in deploy line: {line}"))?;

    if let Some(rest) = rest.strip_prefix("DEPLOY_COMPLETE:") {
        let rest = rest.trim();
        let (command, exit_code) = split_bracket(rest, "EXIT_CODE:");
        let exit_code = exit_code.and_then(|v| v.trim().parse::<i32>().ok());
        return Ok(Some(DeployEvent::Complete {
            project: project.to_string(),
            timestamp,
            command,
            exit_code,
        }));
    }
    if let Some(rest) = rest.strip_prefix("DEPLOY:") {
        let rest = rest.trim();
        let (command, cwd) = split_bracket(rest, "CWD:");
        return Ok(Some(DeployEvent::Start {
            project: project.to_string(),
            timestamp,
            command,
            cwd,
        }));
    }
    Err(format!("unrecognised deploy line: {line}"))
}

/// Splits `"<command> [<tag> <value>]"` into `(command, Some(value))`, or
/// `(command, None)` if the bracketed suffix is absent.
fn split_bracket(rest: &str, tag: &str) -> (String, Option<String>) {
    match rest.rfind('[') {
        Some(idx) if rest.ends_with(']') => {
            let command = rest[..idx].trim().to_string();
            let inner = &rest[idx + 1..rest.len() - 1];
            let value = inner.strip_prefix(tag).map(|v| v.trim().to_string());
            (command, value)
        }
        _ => (rest.trim().to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_line_with_cwd() {
        let event =
            parse_deploy_line("demo", "1700000000.0 DEPLOY: firebase deploy [CWD: /home/demo]")
                .unwrap()
                .unwrap();
        match event {
            DeployEvent::Start { command, cwd, .. } => {
                assert_eq!(command, "firebase deploy");
                assert_eq!(cwd.as_deref(), Some("/home/demo"));
            }
            _ => panic!("expected start event"),
        }
    }

    #[test]
    fn parses_start_line_without_cwd() {
        let event = parse_deploy_line("demo", "1700000000.0 DEPLOY: firebase deploy")
            .unwrap()
            .unwrap();
        match event {
            DeployEvent::Start { cwd, .. } => assert_eq!(cwd, None),
            _ => panic!("expected start event"),
        }
    }

    #[test]
    fn parses_complete_line_with_exit_code() {
        let event = parse_deploy_line(
            "demo",
            "1700000100.0 DEPLOY_COMPLETE: firebase deploy [EXIT_CODE: 0]",
        )
        .unwrap()
        .unwrap();
        match event {
            DeployEvent::Complete { exit_code, .. } => assert_eq!(exit_code, Some(0)),
            _ => panic!("expected complete event"),
        }
    }

    #[test]
    fn unparseable_line_is_skipped_not_fatal() {
        assert!(parse_deploy_line("demo", "not a deploy line").is_err());
    }

    #[tokio::test]
    async fn attach_starts_position_at_current_size_not_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy_log.txt");
        tokio::fs::write(&path, "1700000000.0 DEPLOY: old deploy\n")
            .await
            .unwrap();

        let monitor = DeployMonitor::new();
        monitor.attach("demo", path.clone()).await;
        assert!(monitor.is_monitoring("demo").await);

        let size = tokio::fs::metadata(&path).await.unwrap().len();
        let state = monitor.state.lock().await;
        assert_eq!(*state.last_position.get(&path).unwrap(), size);
    }
}
