//! C6 Task Catalog: parses a project's `TODO.md` into scored `Task` records.
//! Hashtag extraction via a precompiled `regex::Regex` mirrors the pack's use
//! of `regex` for text scanning elsewhere in the stack.
//!
//! Tag→app and keyword→app tables carried verbatim in spirit from the
//! original Python implementation's `tasks.py`.

use crate::model::Task;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static HASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([A-Za-z0-9_]+)").unwrap());

const TAG_APP_TABLE: &[(&str, &str)] = &[
    ("writing", "Bear"),
    ("creative", "Figma"),
    ("design", "Figma"),
    ("research", "Safari"),
    ("code", "VSCode"),
    ("backend", "Terminal"),
    ("business", "Notion"),
    ("todo", "Things"),
    ("notes", "Bear"),
    ("email", "Mail"),
];

const KEYWORD_APP_TABLE: &[(&str, &str)] = &[
    ("write", "Bear"),
    ("document", "Bear"),
    ("blog", "Bear"),
    ("note", "Bear"),
    ("design", "Figma"),
    ("mockup", "Figma"),
    ("wireframe", "Figma"),
    ("code", "VSCode"),
    ("develop", "VSCode"),
    ("implement", "VSCode"),
    ("research", "Safari"),
    ("google", "Safari"),
    ("investigate", "Safari"),
    ("email", "Mail"),
    ("call", "FaceTime"),
    ("meeting", "Zoom"),
];

const DEFAULT_APP: &str = "Notion";

/// Parses `TODO.md` content line-by-line. Missing/unreadable files are the
/// caller's concern (`parse` itself just needs a `&str`); either way an
/// empty catalog is never fatal.
pub fn parse(content: &str) -> Vec<Task> {
    let mut tasks = Vec::new();
    let mut section = String::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim_end();
        if let Some(heading) = line.trim_start().strip_prefix("## ") {
            section = heading.trim().to_string();
            continue;
        }

        let trimmed = line.trim_start();
        let (completed, rest) = if let Some(rest) = trimmed.strip_prefix("- [ ] ") {
            (false, rest)
        } else if let Some(rest) = trimmed.strip_prefix("- [x] ") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("- [X] ") {
            (true, rest)
        } else {
            continue;
        };

        let tags: BTreeSet<String> = HASHTAG
            .captures_iter(rest)
            .map(|c| c[1].to_lowercase())
            .collect();
        let text = HASHTAG.replace_all(rest, "").trim().to_string();

        let app = resolve_app(&tags, &text);
        let priority = compute_priority(&tags, &text);
        let estimated_duration_min = compute_duration(&tags, &text);

        tasks.push(Task {
            id: format!("task-{idx}"),
            text,
            original_text: raw_line.to_string(),
            tags,
            completed,
            section: section.clone(),
            line_number: idx + 1,
            app,
            priority,
            estimated_duration_min,
        });
    }

    tasks
}

fn resolve_app(tags: &BTreeSet<String>, text: &str) -> String {
    for (tag, app) in TAG_APP_TABLE {
        if tags.contains(*tag) {
            return app.to_string();
        }
    }
    let lower = text.to_lowercase();
    for (keyword, app) in KEYWORD_APP_TABLE {
        if lower.contains(keyword) {
            return app.to_string();
        }
    }
    DEFAULT_APP.to_string()
}

fn compute_priority(tags: &BTreeSet<String>, text: &str) -> u8 {
    let mut score: i32 = 5;
    if tags.contains("urgent") {
        score += 3;
    }
    if tags.contains("important") || tags.contains("high") {
        score += 2;
    }
    if tags.contains("low") {
        score -= 2;
    }
    if tags.contains("someday") {
        score -= 3;
    }
    if tags.contains("short") {
        score += 1;
    }
    if tags.contains("solo") {
        score += 1;
    }

    let lower = text.to_lowercase();
    if ["urgent", "asap", "deadline", "important"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        score += 2;
    }
    if ["someday", "maybe", "nice to have"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        score -= 2;
    }

    score.clamp(1, 10) as u8
}

fn compute_duration(tags: &BTreeSet<String>, text: &str) -> u32 {
    if tags.contains("short") {
        return 20;
    }
    if tags.contains("long") {
        return 120;
    }
    if tags.contains("quick") {
        return 10;
    }

    let lower = text.to_lowercase();
    if ["quick", "simple", "update", "check", "review"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return 15;
    }
    if ["implement", "design", "research", "write", "create", "build"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return 90;
    }
    45
}

#[cfg(test)]
mod tests {
    use super::*;

    const TODO: &str = "\
## Now
- [ ] write release notes #writing #urgent
- [x] deploy staging #backend
## Later
- [ ] research competitor pricing #research #someday
";

    #[test]
    fn parses_sections_and_completion() {
        let tasks = parse(TODO);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].section, "Now");
        assert_eq!(tasks[2].section, "Later");
        assert!(tasks[1].completed);
        assert!(!tasks[0].completed);
    }

    #[test]
    fn strips_tags_from_display_text() {
        let tasks = parse(TODO);
        assert_eq!(tasks[0].text, "write release notes");
        assert!(tasks[0].tags.contains("writing"));
        assert!(tasks[0].tags.contains("urgent"));
    }

    #[test]
    fn tag_beats_keyword_for_app_resolution() {
        let tasks = parse(TODO);
        assert_eq!(tasks[0].app, "Bear");
    }

    #[test]
    fn urgent_tag_and_keyword_both_boost_priority() {
        let tasks = parse(TODO);
        // base 5 + urgent tag(+3) clamps at 10 regardless of keyword boost
        assert_eq!(tasks[0].priority, 10);
    }

    #[test]
    fn someday_tag_lowers_duration_is_unaffected_but_priority_drops() {
        let tasks = parse(TODO);
        assert_eq!(tasks[2].priority, 5 + 1 - 3); // research(+1) + someday(-3)
    }

    #[test]
    fn keyword_driven_duration_without_tags() {
        let tasks = parse("- [ ] write the quarterly report\n");
        assert_eq!(tasks[0].estimated_duration_min, 90);
    }
}
