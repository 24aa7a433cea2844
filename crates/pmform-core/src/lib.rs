//! pmform-core - offline-resilient form submission for pmform clients
//!
//! Local drafts with debounced auto-save, a durable offline queue with
//! retry, connectivity tracking, and the HTTP client for the form API.

pub mod autosave;
pub mod client;
pub mod config;
pub mod drafts;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod util;

pub use autosave::{AutoSave, AutoSaveOptions, AutoSaveStatus};
pub use client::{SubmitClient, SubmitError, SubmitReceipt};
pub use config::ClientConfig;
pub use drafts::DraftStore;
pub use error::{Error, Result, StorageError};
pub use models::{Draft, QueueStats, QueuedSubmission, SubmissionId, SubmissionStatus, SyncReport};
pub use network::{HealthProbe, NetworkMonitor, NetworkStatus};
pub use queue::{OfflineQueue, SubmissionTransport};
pub use storage::{LocalStore, MemoryBackend, SqliteBackend, StorageBackend};
pub use sync::{SubmitOutcome, SyncCoordinator};
