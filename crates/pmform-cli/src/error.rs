use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] pmform_core::Error),
    #[error(transparent)]
    Storage(#[from] pmform_core::StorageError),
    #[error(transparent)]
    Config(#[from] pmform_core::config::ConfigError),
    #[error(transparent)]
    Submit(#[from] pmform_core::SubmitError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No form data provided")]
    EmptyPayload,
    #[error("Form data must be a JSON object")]
    PayloadNotObject,
    #[error("Form ID cannot be empty")]
    EmptyFormId,
    #[error("No draft saved for form: {0}")]
    DraftNotFound(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Form API at {0} is unreachable; queued submissions stay pending")]
    Offline(String),
}
