use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use pmform_core::{
    ClientConfig, LocalStore, OfflineQueue, QueueStats, QueuedSubmission, SqliteBackend,
    SubmitClient, SyncReport,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct DraftListItem {
    pub form_id: String,
    pub saved_at: DateTime<Utc>,
    pub relative_time: String,
    pub summary: String,
}

/// Client settings from the environment with command-line overrides.
pub fn load_config(
    data_dir: Option<&Path>,
    api_url: Option<&str>,
) -> Result<ClientConfig, CliError> {
    load_config_with(data_dir, api_url, |name| env::var(name).ok())
}

pub fn load_config_with(
    data_dir: Option<&Path>,
    api_url: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ClientConfig, CliError> {
    let data_dir = data_dir.map(|path| path.to_string_lossy().into_owned());
    let config = ClientConfig::from_lookup(|name| match name {
        "PMFORM_DATA_DIR" if data_dir.is_some() => data_dir.clone(),
        "PMFORM_API_BASE_URL" if api_url.is_some() => api_url.map(str::to_string),
        _ => lookup(name),
    })?;
    Ok(config)
}

pub fn open_store(config: &ClientConfig) -> Result<LocalStore, CliError> {
    let backend = SqliteBackend::open(config.database_path())?;
    Ok(LocalStore::new(Arc::new(backend)))
}

/// The offline queue, with items stranded mid-sync by an earlier crash
/// returned to pending.
pub fn open_queue(store: LocalStore) -> Result<OfflineQueue, CliError> {
    let queue = OfflineQueue::new(store);
    let recovered = queue.recover_interrupted()?;
    if recovered > 0 {
        tracing::info!(recovered, "Recovered interrupted submissions");
    }
    Ok(queue)
}

pub fn build_client(config: &ClientConfig) -> Result<SubmitClient, CliError> {
    Ok(SubmitClient::new(
        config.api_base_url.as_str(),
        config.request_timeout,
    )?)
}

pub fn normalize_form_id(form_id: &str) -> Result<String, CliError> {
    let trimmed = form_id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyFormId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Form data from `file`, else piped stdin; `None` when neither has any.
pub fn read_payload(file: Option<&Path>) -> Result<Option<Value>, CliError> {
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)?;
        return parse_payload(&text).map(Some);
    }
    match read_piped_stdin()? {
        Some(text) => parse_payload(&text).map(Some),
        None => Ok(None),
    }
}

pub fn parse_payload(text: &str) -> Result<Value, CliError> {
    if text.trim().is_empty() {
        return Err(CliError::EmptyPayload);
    }
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CliError::PayloadNotObject);
    }
    Ok(value)
}

/// Form JSON piped on stdin; `None` for an interactive terminal or an
/// empty pipe.
pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let text = io::read_to_string(stdin)?;
    Ok(Some(text).filter(|text| !text.trim().is_empty()))
}

/// One-line description of a form payload: location and machine number.
pub fn form_summary(data: &Value, max_chars: usize) -> String {
    let field = |name: &str| {
        data.get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let collapsed = match (field("location"), field("machine_number")) {
        (Some(location), Some(machine)) => format!("{location} #{machine}"),
        (Some(location), None) => location.to_string(),
        (None, Some(machine)) => format!("#{machine}"),
        (None, None) => "(untitled)".to_string(),
    };
    let collapsed = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_queue_lines(items: &[QueuedSubmission]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let id = short_id(item.id.as_str());
            let summary = form_summary(&item.data, 32);
            let relative_time =
                format_relative_time(item.queued_at.timestamp_millis(), now_ms);
            let line = format!(
                "{id:<13}  {status:<9}  {summary:<32}  {relative_time:<10}  retries={retries}",
                status = item.status.label(),
                retries = item.retries,
            );
            match &item.error {
                Some(error) => format!("{line}  {error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_stats(stats: &QueueStats) -> String {
    format!(
        "total={} pending={} syncing={} failed={} completed={}",
        stats.total, stats.pending, stats.syncing, stats.failed, stats.completed
    )
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Synced {}/{} submission(s), {} failed",
        report.successful, report.total, report.failed
    );
    if let Some(secs) = report.rate_limited_for {
        line.push_str(&format!("; rate limited, retry in {secs}s"));
    }
    line
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Let the user edit `initial` as `<form_id>`'s draft in their editor.
///
/// Returns `None` when the buffer comes back blank.
pub fn edit_draft_text(form_id: &str, initial: &str) -> Result<Option<String>, CliError> {
    let scratch = DraftScratchFile::create(form_id, initial)?;
    let command = editor_command(env::var("VISUAL").ok().or_else(|| env::var("EDITOR").ok()));
    run_editor(&command, scratch.path())?;

    let edited = std::fs::read_to_string(scratch.path())?;
    Ok(Some(edited).filter(|text| !text.trim().is_empty()))
}

/// Program and arguments from a `VISUAL`/`EDITOR` value such as
/// `code --wait`, falling back to the platform default.
pub fn editor_command(configured: Option<String>) -> Vec<String> {
    let words: Vec<String> = configured
        .as_deref()
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if words.is_empty() {
        vec![default_editor().to_string()]
    } else {
        words
    }
}

pub fn run_editor(command: &[String], draft_path: &Path) -> Result<(), CliError> {
    let Some((program, args)) = command.split_first() else {
        return Err(CliError::EditorFailed(
            "no editor configured; set VISUAL or EDITOR".to_string(),
        ));
    };

    let status = Command::new(program)
        .args(args)
        .arg(draft_path)
        .status()
        .map_err(|error| {
            CliError::EditorFailed(format!("could not start `{program}` for the draft: {error}"))
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(CliError::EditorFailed(format!(
            "`{program}` closed with {status}; draft left unchanged"
        )))
    }
}

pub const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

/// Temporary JSON copy of a draft, removed when dropped.
pub struct DraftScratchFile {
    path: PathBuf,
}

impl DraftScratchFile {
    pub fn create(form_id: &str, contents: &str) -> Result<Self, CliError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos());
        let slug: String = form_id
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() || ch == '-' {
                    ch
                } else {
                    '_'
                }
            })
            .collect();
        let path = env::temp_dir().join(format!(
            "pmform-draft-{slug}-{}-{stamp}.json",
            std::process::id()
        ));
        std::fs::write(&path, contents)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DraftScratchFile {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), %error, "Draft scratch file already gone");
        }
    }
}
