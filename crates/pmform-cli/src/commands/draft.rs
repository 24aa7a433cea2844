use std::path::Path;

use chrono::Utc;
use pmform_core::{AutoSave, AutoSaveOptions, ClientConfig, DraftStore, LocalStore};
use serde_json::Value;

use crate::commands::common::{
    edit_draft_text, form_summary, format_relative_time, format_timestamp,
    normalize_form_id, parse_payload, read_payload, DraftListItem,
};
use crate::error::CliError;

pub fn run_draft_save(
    form_id: &str,
    file: Option<&Path>,
    store: LocalStore,
) -> Result<(), CliError> {
    let form_id = normalize_form_id(form_id)?;
    let data = read_payload(file)?.ok_or(CliError::EmptyPayload)?;

    let draft = DraftStore::new(store).save_draft(&form_id, &data)?;
    println!(
        "Saved draft '{form_id}' at {}",
        format_timestamp(draft.saved_at)
    );
    Ok(())
}

pub fn run_draft_show(form_id: &str, as_json: bool, store: LocalStore) -> Result<(), CliError> {
    let form_id = normalize_form_id(form_id)?;
    let draft = DraftStore::new(store)
        .get_draft(&form_id)
        .ok_or_else(|| CliError::DraftNotFound(form_id.clone()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&draft)?);
        return Ok(());
    }

    let relative_time = format_relative_time(
        draft.saved_at.timestamp_millis(),
        Utc::now().timestamp_millis(),
    );
    println!(
        "Draft '{form_id}': {} (saved {relative_time})",
        form_summary(&draft.data, 60)
    );
    println!("{}", serde_json::to_string_pretty(&draft.data)?);
    Ok(())
}

pub fn list_draft_items(drafts: &DraftStore) -> Vec<DraftListItem> {
    let now_ms = Utc::now().timestamp_millis();
    let mut items = drafts
        .list_drafts()
        .into_iter()
        .filter_map(|form_id| {
            let draft = drafts.get_draft(&form_id)?;
            Some(DraftListItem {
                relative_time: format_relative_time(draft.saved_at.timestamp_millis(), now_ms),
                summary: form_summary(&draft.data, 40),
                saved_at: draft.saved_at,
                form_id,
            })
        })
        .collect::<Vec<_>>();
    items.sort_by(|left, right| right.saved_at.cmp(&left.saved_at));
    items
}

pub fn run_draft_list(as_json: bool, store: LocalStore) -> Result<(), CliError> {
    let items = list_draft_items(&DraftStore::new(store));

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No drafts saved.");
    } else {
        for item in &items {
            println!(
                "{:<20}  {:<40}  {}",
                item.form_id, item.summary, item.relative_time
            );
        }
    }
    Ok(())
}

pub fn run_draft_clear(form_id: &str, store: LocalStore) -> Result<(), CliError> {
    let form_id = normalize_form_id(form_id)?;
    let drafts = DraftStore::new(store);
    if !drafts.has_draft(&form_id) {
        return Err(CliError::DraftNotFound(form_id));
    }

    drafts.remove_draft(&form_id)?;
    println!("Cleared draft '{form_id}'");
    Ok(())
}

pub fn run_draft_edit(
    form_id: &str,
    config: &ClientConfig,
    store: LocalStore,
) -> Result<(), CliError> {
    let form_id = normalize_form_id(form_id)?;
    let drafts = DraftStore::new(store);
    let initial = drafts
        .load_data(&form_id)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let initial_text = serde_json::to_string_pretty(&initial)?;

    let Some(edited_text) = edit_draft_text(&form_id, &initial_text)? else {
        return Err(CliError::EmptyPayload);
    };
    let edited = parse_payload(&edited_text)?;
    if edited == initial {
        println!("Draft '{form_id}' unchanged");
        return Ok(());
    }

    let autosave = AutoSave::new(
        drafts,
        AutoSaveOptions::new(form_id.as_str()).with_delay(config.autosave_delay),
    );
    autosave.update(edited);
    if let Some(draft) = autosave.save_now()? {
        println!(
            "Saved draft '{form_id}' at {}",
            format_timestamp(draft.saved_at)
        );
    }
    Ok(())
}
