use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use clap::{CommandFactory, Parser};
use pmform_core::queue::QUEUE_KEY;
use pmform_core::{
    DraftStore, LocalStore, OfflineQueue, QueueStats, QueuedSubmission, SubmissionStatus,
    SyncReport,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::cli::{Cli, Commands, DraftCommands, QueueCommands, DEFAULT_FORM_ID};
use crate::commands::common::{
    default_editor, editor_command, form_summary, format_queue_lines, format_relative_time,
    format_stats, format_sync_report, load_config_with, normalize_form_id, open_store,
    parse_payload, run_editor, DraftScratchFile,
};
use crate::commands::draft::{list_draft_items, run_draft_clear, run_draft_save};
use crate::commands::queue::{run_queue_clear, run_queue_sync};
use crate::commands::submit::run_submit;
use crate::commands::watch::connectivity_label;
use crate::error::CliError;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    move |name: &str| map.get(name).cloned()
}

fn write_json(dir: &Path, name: &str, value: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn subcommands_parse_with_defaults() {
    let cli = Cli::try_parse_from(["pmform", "draft", "show"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Draft {
            command: DraftCommands::Show { ref form_id, json: false }
        } if form_id == DEFAULT_FORM_ID
    ));

    let cli =
        Cli::try_parse_from(["pmform", "queue", "clear", "--completed", "--data-dir", "/tmp/x"])
            .unwrap();
    assert!(matches!(
        cli.command,
        Commands::Queue {
            command: QueueCommands::Clear { completed: true }
        }
    ));
    assert_eq!(cli.data_dir.as_deref(), Some(Path::new("/tmp/x")));
}

#[test]
fn parse_payload_requires_json_object() {
    assert!(matches!(parse_payload("  \n"), Err(CliError::EmptyPayload)));
    assert!(matches!(parse_payload("[1, 2]"), Err(CliError::PayloadNotObject)));
    assert!(matches!(
        parse_payload("{\"date\":"),
        Err(CliError::Serialization(_))
    ));
    assert_eq!(
        parse_payload(" {\"location\": \"Branch 7\"} ").unwrap(),
        json!({"location": "Branch 7"})
    );
}

#[test]
fn form_id_is_trimmed_and_required() {
    assert_eq!(normalize_form_id("  site-a ").unwrap(), "site-a");
    assert!(matches!(normalize_form_id("   "), Err(CliError::EmptyFormId)));
}

#[test]
fn default_editor_is_defined() {
    assert!(!default_editor().is_empty());
}

#[test]
fn editor_command_keeps_arguments_and_falls_back() {
    assert_eq!(
        editor_command(Some("code  --wait".to_string())),
        vec!["code".to_string(), "--wait".to_string()]
    );
    assert_eq!(
        editor_command(Some("   ".to_string())),
        vec![default_editor().to_string()]
    );
    assert_eq!(editor_command(None), vec![default_editor().to_string()]);
}

#[test]
fn missing_editor_program_is_reported() {
    let scratch = DraftScratchFile::create("maintenance", "{}").unwrap();
    let err = run_editor(&[], scratch.path()).unwrap_err();
    assert!(matches!(err, CliError::EditorFailed(message) if message.contains("VISUAL")));

    let command = vec!["pmform-no-such-editor-binary".to_string()];
    let err = run_editor(&command, scratch.path()).unwrap_err();
    assert!(matches!(
        err,
        CliError::EditorFailed(message) if message.contains("pmform-no-such-editor-binary")
    ));
}

#[test]
fn draft_scratch_file_is_named_for_the_form_and_removed_on_drop() {
    let contents = "{\"location\": \"Branch 9\"}";
    let scratch = DraftScratchFile::create("site 9/a", contents).unwrap();
    let path = scratch.path().to_path_buf();
    let name = path.file_name().unwrap().to_string_lossy().into_owned();

    assert!(name.starts_with("pmform-draft-site_9_a-"));
    assert!(name.ends_with(".json"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);

    drop(scratch);
    assert!(!path.exists());
}

#[test]
fn form_summary_prefers_location_and_machine() {
    assert_eq!(
        form_summary(&json!({"location": " Branch  12 ", "machine_number": "1234"}), 40),
        "Branch 12 #1234"
    );
    assert_eq!(form_summary(&json!({"machine_number": "0042"}), 40), "#0042");
    assert_eq!(form_summary(&json!({}), 40), "(untitled)");
    assert_eq!(
        form_summary(&json!({"location": "Central Plaza Ladprao Floor 3"}), 16),
        "Central Plaza..."
    );
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(format_relative_time(now - 3 * 24 * 60 * 60_000, now), "3d ago");
}

#[test]
fn stats_and_reports_render_every_count() {
    let stats = QueueStats {
        total: 4,
        pending: 1,
        syncing: 0,
        failed: 2,
        completed: 1,
    };
    assert_eq!(
        format_stats(&stats),
        "total=4 pending=1 syncing=0 failed=2 completed=1"
    );

    let report = SyncReport {
        successful: 1,
        failed: 0,
        total: 3,
        rate_limited_for: Some(42),
    };
    assert_eq!(
        format_sync_report(&report),
        "Synced 1/3 submission(s), 0 failed; rate limited, retry in 42s"
    );
}

#[test]
fn queue_lines_include_status_retries_and_error() {
    let mut item = QueuedSubmission::new(json!({"location": "Branch 7", "machine_number": "1234"}));
    item.status = SubmissionStatus::Failed;
    item.retries = 3;
    item.error = Some("Network error: connection refused".to_string());

    let lines = format_queue_lines(&[item]);

    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("failed"));
    assert!(lines[0].contains("Branch 7 #1234"));
    assert!(lines[0].contains("retries=3"));
    assert!(lines[0].ends_with("Network error: connection refused"));
}

#[test]
fn config_overrides_take_precedence() {
    let config = load_config_with(
        Some(Path::new("/var/lib/pmform-test")),
        Some("https://forms.example.com/"),
        lookup_from(&[
            ("PMFORM_DATA_DIR", "/ignored"),
            ("PMFORM_API_BASE_URL", "http://ignored"),
            ("PMFORM_AUTOSAVE_DELAY_SECS", "5"),
        ]),
    )
    .unwrap();

    assert_eq!(config.api_base_url, "https://forms.example.com");
    assert_eq!(
        config.database_path(),
        Path::new("/var/lib/pmform-test").join("pmform.db")
    );
    assert_eq!(config.autosave_delay, Duration::from_secs(5));

    let err = load_config_with(None, Some("forms.example.com"), lookup_from(&[])).unwrap_err();
    assert!(matches!(err, CliError::Config(_)));
}

#[test]
fn drafts_survive_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_with(Some(dir.path()), None, lookup_from(&[])).unwrap();
    let payload = write_json(dir.path(), "form.json", &json!({"location": "Branch 9"}));

    run_draft_save("site-9", Some(&payload), open_store(&config).unwrap()).unwrap();

    let reopened = DraftStore::new(open_store(&config).unwrap());
    assert_eq!(
        reopened.load_data("site-9"),
        Some(json!({"location": "Branch 9"}))
    );
}

#[test]
fn draft_list_is_newest_first_and_clear_requires_draft() {
    let store = LocalStore::in_memory();
    let drafts = DraftStore::new(store.clone());
    drafts
        .save_draft("older", &json!({"location": "Branch 1"}))
        .unwrap();
    std::thread::sleep(Duration::from_millis(5));
    drafts
        .save_draft("newer", &json!({"location": "Branch 2"}))
        .unwrap();

    let items = list_draft_items(&drafts);
    let ids: Vec<&str> = items.iter().map(|item| item.form_id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);
    assert_eq!(items[1].summary, "Branch 1");

    run_draft_clear("older", store.clone()).unwrap();
    assert!(matches!(
        run_draft_clear("older", store),
        Err(CliError::DraftNotFound(form_id)) if form_id == "older"
    ));
}

#[test]
fn queue_clear_completed_keeps_undelivered_items() {
    let store = LocalStore::in_memory();
    let queue = OfflineQueue::new(store.clone());
    queue.enqueue(json!({"n": 1})).unwrap();
    let mut items = queue.list();
    items.push(QueuedSubmission {
        status: SubmissionStatus::Completed,
        ..QueuedSubmission::new(json!({"n": 2}))
    });
    store.set(QUEUE_KEY, &items).unwrap();

    run_queue_clear(true, store.clone()).unwrap();
    assert_eq!(queue.stats().total, 1);
    assert_eq!(queue.stats().pending, 1);

    run_queue_clear(false, store).unwrap();
    assert_eq!(queue.stats().total, 0);
}

#[tokio::test]
async fn offline_submit_is_queued_and_sync_reports_offline() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_with(
        Some(dir.path()),
        Some("http://127.0.0.1:9"),
        lookup_from(&[
            ("PMFORM_HEALTH_TIMEOUT_SECS", "1"),
            ("PMFORM_REQUEST_TIMEOUT_SECS", "1"),
        ]),
    )
    .unwrap();
    let payload = write_json(
        dir.path(),
        "form.json",
        &json!({"location": "Branch 3", "machine_number": "0003"}),
    );

    run_submit(
        DEFAULT_FORM_ID,
        Some(&payload),
        false,
        &config,
        open_store(&config).unwrap(),
    )
    .await
    .unwrap();

    let queue = OfflineQueue::new(open_store(&config).unwrap());
    let items = queue.list();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, SubmissionStatus::Pending);
    assert_eq!(items[0].data["location"], json!("Branch 3"));
    assert!(items[0].queued_at <= Utc::now());

    let err = run_queue_sync(&config, open_store(&config).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::Offline(url) if url == "http://127.0.0.1:9"));
}

#[test]
fn connectivity_labels() {
    assert_eq!(connectivity_label(true), "online");
    assert_eq!(connectivity_label(false), "offline");
}
