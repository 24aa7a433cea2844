//! Per-form draft persistence.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;
use crate::models::Draft;
use crate::storage::LocalStore;
use crate::util::elapsed_ms;

const DRAFT_KEY_PREFIX: &str = "draft_";

/// One draft slot per form id; the latest save wins.
#[derive(Clone)]
pub struct DraftStore {
    store: LocalStore,
}

impl DraftStore {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    fn key(form_id: &str) -> String {
        format!("{DRAFT_KEY_PREFIX}{form_id}")
    }

    /// Stamp `data` with the current time and overwrite the form's draft.
    pub fn save_draft<T: Serialize>(&self, form_id: &str, data: &T) -> Result<Draft, StorageError> {
        let draft = Draft::new(serde_json::to_value(data)?);
        self.store.set(&Self::key(form_id), &draft)?;
        tracing::debug!(form_id, "Saved draft");
        Ok(draft)
    }

    pub fn get_draft(&self, form_id: &str) -> Option<Draft> {
        self.store.get(&Self::key(form_id))
    }

    /// Draft payload only, for restoring a form.
    pub fn load_data(&self, form_id: &str) -> Option<Value> {
        self.get_draft(form_id).map(|draft| draft.data)
    }

    pub fn remove_draft(&self, form_id: &str) -> Result<(), StorageError> {
        self.store.remove(&Self::key(form_id))?;
        tracing::debug!(form_id, "Removed draft");
        Ok(())
    }

    pub fn has_draft(&self, form_id: &str) -> bool {
        self.get_draft(form_id).is_some()
    }

    /// Milliseconds since the draft was saved, `None` without a draft.
    pub fn draft_age_ms(&self, form_id: &str) -> Option<u64> {
        self.get_draft(form_id)
            .map(|draft| elapsed_ms(draft.saved_at, Utc::now()))
    }

    /// Form ids that currently have a draft.
    pub fn list_drafts(&self) -> Vec<String> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(DRAFT_KEY_PREFIX).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryBackend;

    fn drafts() -> DraftStore {
        DraftStore::new(LocalStore::in_memory())
    }

    #[test]
    fn save_then_get_returns_data_and_recent_timestamp() {
        let drafts = drafts();
        let before = Utc::now();
        drafts
            .save_draft("maintenance-form", &json!({"location": "Branch 7"}))
            .unwrap();

        let draft = drafts.get_draft("maintenance-form").unwrap();
        assert_eq!(draft.data, json!({"location": "Branch 7"}));
        let delta = (draft.saved_at - before).num_milliseconds();
        assert!((0..1_000).contains(&delta), "saved_at delta was {delta}ms");
    }

    #[test]
    fn remove_then_get_returns_none() {
        let drafts = drafts();
        drafts.save_draft("f", &json!({"a": 1})).unwrap();
        drafts.remove_draft("f").unwrap();

        assert_eq!(drafts.get_draft("f"), None);
        assert!(!drafts.has_draft("f"));
        assert_eq!(drafts.draft_age_ms("f"), None);
    }

    #[test]
    fn last_write_wins() {
        let drafts = drafts();
        drafts.save_draft("f", &json!({"v": 1})).unwrap();
        drafts.save_draft("f", &json!({"v": 2})).unwrap();
        assert_eq!(drafts.load_data("f"), Some(json!({"v": 2})));
    }

    #[test]
    fn list_drafts_strips_prefix_and_skips_queue() {
        let store = LocalStore::in_memory();
        store.set("offline_queue", &Vec::<u8>::new()).unwrap();
        let drafts = DraftStore::new(store);
        drafts.save_draft("alpha", &json!({})).unwrap();
        drafts.save_draft("beta", &json!({})).unwrap();

        assert_eq!(drafts.list_drafts(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn draft_age_is_small_after_save() {
        let drafts = drafts();
        drafts.save_draft("f", &json!({})).unwrap();
        let age = drafts.draft_age_ms("f").unwrap();
        assert!(age < 1_000);
    }

    #[test]
    fn save_reports_quota_failure() {
        let drafts = DraftStore::new(LocalStore::new(Arc::new(MemoryBackend::with_quota(8))));
        assert!(drafts.save_draft("f", &json!({"big": "x".repeat(64)})).is_err());
        assert!(!drafts.has_draft("f"));
    }
}
