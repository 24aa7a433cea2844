//! Namespaced local key-value persistence.
//!
//! `LocalStore` is the only path to durable client state. Every key is
//! prefixed with [`STORAGE_PREFIX`] and every value is wrapped in a
//! versioned envelope. Persistence is best-effort: failures are logged and
//! returned as values, reads degrade to `None`.

mod memory;
mod sqlite;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Prefix applied to every key written through [`LocalStore`].
pub const STORAGE_PREFIX: &str = "pmform_";

/// Version tag written alongside every persisted value.
pub const STORAGE_SCHEMA_VERSION: u32 = 1;

const AVAILABILITY_PROBE_KEY: &str = "__storage_test__";

/// Raw string storage underneath [`LocalStore`].
pub trait StorageBackend: Send + Sync {
    fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_raw(&self, key: &str) -> Result<(), StorageError>;

    /// Full keys (prefix included) starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a, T> {
    schema_version: u32,
    value: &'a T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    schema_version: u32,
    value: Value,
}

/// Namespaced, versioned key-value store over a [`StorageBackend`].
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_prefix(backend, STORAGE_PREFIX)
    }

    pub fn with_prefix(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Store backed by an in-process map (tests, ephemeral sessions).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Serialize and write `value` under `key`.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let result = serde_json::to_string(&EnvelopeRef {
            schema_version: STORAGE_SCHEMA_VERSION,
            value,
        })
        .map_err(StorageError::from)
        .and_then(|encoded| self.backend.set_raw(&self.full_key(key), &encoded));

        if let Err(error) = &result {
            tracing::warn!(key, %error, "Failed to write local storage entry");
        }
        result
    }

    /// Read and decode the value under `key`.
    ///
    /// Missing keys, backend failures, undecodable payloads and payloads
    /// written under another schema version all read as `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get_raw(&self.full_key(key)) {
            Ok(raw) => raw?,
            Err(error) => {
                tracing::warn!(key, %error, "Failed to read local storage entry");
                return None;
            }
        };

        let envelope = match serde_json::from_str::<RawEnvelope>(&raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(key, %error, "Discarding unreadable local storage entry");
                return None;
            }
        };
        if envelope.schema_version != STORAGE_SCHEMA_VERSION {
            tracing::warn!(
                key,
                found = envelope.schema_version,
                expected = STORAGE_SCHEMA_VERSION,
                "Ignoring local storage entry with unsupported schema version"
            );
            return None;
        }

        match serde_json::from_value(envelope.value) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, %error, "Local storage entry has unexpected shape");
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get::<Value>(key).is_some()
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let result = self.backend.remove_raw(&self.full_key(key));
        if let Err(error) = &result {
            tracing::warn!(key, %error, "Failed to remove local storage entry");
        }
        result
    }

    /// Remove every key in this store's namespace, returning how many went.
    pub fn clear_namespace(&self) -> Result<usize, StorageError> {
        let keys = self.backend.keys_with_prefix(&self.prefix).map_err(|error| {
            tracing::warn!(%error, "Failed to list local storage keys for clearing");
            error
        })?;
        for key in &keys {
            self.backend.remove_raw(key).map_err(|error| {
                tracing::warn!(key = key.as_str(), %error, "Failed to clear local storage entry");
                error
            })?;
        }
        Ok(keys.len())
    }

    /// Keys in this namespace with the prefix stripped.
    pub fn keys(&self) -> Vec<String> {
        match self.backend.keys_with_prefix(&self.prefix) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| key.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(error) => {
                tracing::warn!(%error, "Failed to list local storage keys");
                Vec::new()
            }
        }
    }

    /// Probe whether the backend accepts writes right now.
    pub fn is_available(&self) -> bool {
        let probe = self.full_key(AVAILABILITY_PROBE_KEY);
        self.backend
            .set_raw(&probe, AVAILABILITY_PROBE_KEY)
            .and_then(|()| self.backend.remove_raw(&probe))
            .is_ok()
    }
}
