//! C8 App Redirector: cascades deep-link → command-line → simple-open
//! strategies for handing a task off to its target app, scaled
//! down from `src-tauri`'s subprocess-invocation patterns
//! (`sidecar_manager.rs`).

use crate::model::Task;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::Path;
use std::time::Duration;

const EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_URL_LEN: usize = 2000;
const MAX_NOTE_BODY_BYTES: usize = 2 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectMethod {
    DeepLinking,
    CommandLine,
    SimpleOpen,
    Error,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RedirectOutcome {
    pub success: bool,
    pub method: RedirectMethod,
    pub app: String,
    pub action: Option<String>,
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum AppKind {
    NoteApp,
    CodeEditor,
    BrowserResearch,
    TaskList,
    Workspace,
    Generic,
}

fn classify(app: &str) -> AppKind {
    match app {
        "Bear" | "Notes" => AppKind::NoteApp,
        "VSCode" | "Terminal" => AppKind::CodeEditor,
        "Safari" => AppKind::BrowserResearch,
        "Things" => AppKind::TaskList,
        "Notion" => AppKind::Workspace,
        _ => AppKind::Generic,
    }
}

fn cli_for(app: &str) -> Option<&'static str> {
    match app {
        "VSCode" => Some("code"),
        "Terminal" => Some("open"),
        _ => None,
    }
}

pub struct AppRedirector;

impl AppRedirector {
    pub fn new() -> Self {
        Self
    }

    pub async fn redirect(&self, task: &Task, project_path: &Path) -> RedirectOutcome {
        if let Some(outcome) = self.try_deep_link(task, project_path) {
            return outcome;
        }
        if let Some(outcome) = self.try_command_line(task, project_path).await {
            return outcome;
        }
        self.try_simple_open(task).await
    }

    fn try_deep_link(&self, task: &Task, project_path: &Path) -> Option<RedirectOutcome> {
        match classify(&task.app) {
            AppKind::NoteApp => {
                let title = utf8_percent_encode(&task.text, NON_ALPHANUMERIC).to_string();
                let full_body = format!("Suggested by DeployBot while waiting on a deploy.\n\n{}", task.text);
                let body = if estimate_url_len(&title, &full_body) > MAX_URL_LEN {
                    "Suggested by DeployBot.".to_string()
                } else {
                    full_body
                };
                let encoded_body = utf8_percent_encode(&body, NON_ALPHANUMERIC).to_string();
                let body_bytes = encoded_body.as_bytes();
                let encoded_body = if body_bytes.len() > MAX_NOTE_BODY_BYTES {
                    String::from_utf8_lossy(&body_bytes[..MAX_NOTE_BODY_BYTES]).into_owned()
                } else {
                    encoded_body
                };
                let url = format!("bear://x-callback-url/create?title={title}&text={encoded_body}");
                Some(success(RedirectMethod::DeepLinking, &task.app, Some("create-note"), Some(url)))
            }
            AppKind::CodeEditor => {
                let cli = cli_for(&task.app)?;
                let action = format!("{cli} {}", project_path.display());
                Some(success(RedirectMethod::CommandLine, &task.app, Some("open-project"), Some(action)))
            }
            AppKind::BrowserResearch => {
                let query = keyword_filtered(&task.text);
                let encoded = utf8_percent_encode(&query, NON_ALPHANUMERIC).to_string();
                let url = format!("https://www.google.com/search?q={encoded}");
                Some(success(RedirectMethod::DeepLinking, &task.app, Some("search"), Some(url)))
            }
            AppKind::TaskList => {
                let title = utf8_percent_encode(&task.text, NON_ALPHANUMERIC).to_string();
                let tags: Vec<&str> = task.tags.iter().map(|s| s.as_str()).collect();
                let url = format!("things:///add?title={title}&tags={}", tags.join(","));
                Some(success(RedirectMethod::DeepLinking, &task.app, Some("add-todo"), Some(url)))
            }
            AppKind::Workspace => {
                let url = format!("notion://{}", project_path.display());
                Some(success(RedirectMethod::DeepLinking, &task.app, Some("open-workspace"), Some(url)))
            }
            AppKind::Generic => None,
        }
    }

    async fn try_command_line(&self, task: &Task, project_path: &Path) -> Option<RedirectOutcome> {
        let cli = cli_for(&task.app)?;
        let mut args = vec![project_path.display().to_string()];
        if task.tags.contains("code") {
            if let Some(hit) = guess_code_file(project_path).await {
                args.push(hit);
            }
        }

        let result = tokio::time::timeout(
            EXTERNAL_TIMEOUT,
            tokio::process::Command::new(cli).args(&args).status(),
        )
        .await;

        match result {
            Ok(Ok(status)) if status.success() => Some(success(
                RedirectMethod::CommandLine,
                &task.app,
                Some(args.join(" ")),
                None,
            )),
            Ok(Ok(status)) => Some(failure(
                &task.app,
                format!("{cli} exited with {status}"),
            )),
            Ok(Err(err)) => Some(failure(&task.app, err.to_string())),
            Err(_) => Some(failure(&task.app, format!("{cli} timed out"))),
        }
    }

    async fn try_simple_open(&self, task: &Task) -> RedirectOutcome {
        let result = tokio::time::timeout(
            EXTERNAL_TIMEOUT,
            tokio::process::Command::new("open").arg("-a").arg(&task.app).status(),
        )
        .await;

        match result {
            Ok(Ok(status)) if status.success() => {
                success(RedirectMethod::SimpleOpen, &task.app, Some("launch".into()), None)
            }
            Ok(Ok(status)) => failure(&task.app, format!("open -a {} exited with {status}", task.app)),
            Ok(Err(err)) => failure(&task.app, err.to_string()),
            Err(_) => failure(&task.app, "simple open timed out".to_string()),
        }
    }
}

impl Default for AppRedirector {
    fn default() -> Self {
        Self::new()
    }
}

fn success(
    method: RedirectMethod,
    app: &str,
    action: Option<impl Into<String>>,
    url: Option<String>,
) -> RedirectOutcome {
    RedirectOutcome {
        success: true,
        method,
        app: app.to_string(),
        action: action.map(Into::into),
        url,
        error: None,
    }
}

fn failure(app: &str, error: String) -> RedirectOutcome {
    RedirectOutcome {
        success: false,
        method: RedirectMethod::Error,
        app: app.to_string(),
        action: None,
        url: None,
        error: Some(error),
    }
}

fn estimate_url_len(title: &str, body: &str) -> usize {
    let base = "bear://x-callback-url/create?title=&text=".len();
    base + title.len() * 3 + body.len() * 3
}

fn keyword_filtered(text: &str) -> String {
    const STOPWORDS: &[&str] = &["the", "a", "an", "of", "for", "to", "on", "in"];
    text.split_whitespace()
        .filter(|w| !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

async fn guess_code_file(project_path: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(project_path).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().map(|e| e == "rs" || e == "ts" || e == "py").unwrap_or(false) {
            return Some(path.display().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn task(app: &str, text: &str, tags: &[&str]) -> Task {
        Task {
            id: "t".into(),
            text: text.into(),
            original_text: text.into(),
            tags: tags.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            completed: false,
            section: "Now".into(),
            line_number: 1,
            app: app.into(),
            priority: 5,
            estimated_duration_min: 30,
        }
    }

    #[test]
    fn note_app_builds_bear_create_url() {
        let redirector = AppRedirector::new();
        let outcome = redirector
            .try_deep_link(&task("Bear", "write release notes", &[]), Path::new("/tmp"))
            .unwrap();
        assert_eq!(outcome.method, RedirectMethod::DeepLinking);
        assert!(outcome.url.unwrap().starts_with("bear://"));
    }

    #[test]
    fn browser_research_filters_stopwords() {
        assert_eq!(keyword_filtered("research the competitor pricing"), "research competitor pricing");
    }

    #[test]
    fn workspace_app_has_no_cli() {
        assert!(cli_for("Notion").is_none());
    }
}
