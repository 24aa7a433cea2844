//! Form draft model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Last auto-saved snapshot of one in-progress form.
///
/// The form id is the storage key, so it is not part of the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub data: Value,
    pub saved_at: DateTime<Utc>,
}

impl Draft {
    /// Wrap `data` with the current time as its save timestamp
    #[must_use]
    pub fn new(data: Value) -> Self {
        Self {
            data,
            saved_at: Utc::now(),
        }
    }
}
