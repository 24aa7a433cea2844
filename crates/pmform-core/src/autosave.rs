//! Debounced background saving of in-progress form state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::drafts::DraftStore;
use crate::error::StorageError;
use crate::models::Draft;

/// Default quiet period before an automatic save.
pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_secs(30);

/// Delays a task until a quiet period follows the latest trigger.
///
/// Every `schedule` cancels the previously scheduled task and restarts the
/// delay. Dropping the debouncer cancels whatever is pending.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub const fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `task` after the delay unless another schedule or cancel comes first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending task, returning whether one was still waiting.
    pub fn cancel(&self) -> bool {
        self.slot().take().is_some_and(|handle| {
            let waiting = !handle.is_finished();
            handle.abort();
            waiting
        })
    }

    pub fn is_pending(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        // A poisoned slot only ever holds a join handle; keep using it.
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Auto-save configuration for one form.
#[derive(Debug, Clone)]
pub struct AutoSaveOptions {
    pub form_id: String,
    pub delay: Duration,
    pub enabled: bool,
}

impl AutoSaveOptions {
    pub fn new(form_id: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            delay: DEFAULT_AUTOSAVE_DELAY,
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Observable state of the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutoSaveStatus {
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// A debounced save is waiting to fire
    pub pending: bool,
}

type SaveCallback = Arc<dyn Fn(&Value) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&StorageError) + Send + Sync>;

#[derive(Default)]
struct SaveState {
    current: Option<Value>,
    /// Serialized form of the last successfully saved snapshot
    baseline: String,
    is_saving: bool,
    last_saved: Option<DateTime<Utc>>,
    error: Option<String>,
}

struct Inner {
    drafts: DraftStore,
    options: AutoSaveOptions,
    debouncer: Debouncer,
    state: Mutex<SaveState>,
    on_save: Option<SaveCallback>,
    on_error: Option<ErrorCallback>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SaveState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn save_current(&self) -> Result<Option<Draft>, StorageError> {
        let snapshot = {
            let mut state = self.state();
            let Some(current) = state.current.clone() else {
                return Ok(None);
            };
            state.is_saving = true;
            state.error = None;
            current
        };

        let result = self.drafts.save_draft(&self.options.form_id, &snapshot);

        {
            let mut state = self.state();
            state.is_saving = false;
            match &result {
                Ok(draft) => {
                    state.last_saved = Some(draft.saved_at);
                    state.baseline = snapshot.to_string();
                }
                Err(error) => state.error = Some(error.to_string()),
            }
        }

        match result {
            Ok(draft) => {
                tracing::debug!(form_id = self.options.form_id.as_str(), "Auto-saved draft");
                if let Some(on_save) = &self.on_save {
                    on_save(&snapshot);
                }
                Ok(Some(draft))
            }
            Err(error) => {
                tracing::error!(
                    form_id = self.options.form_id.as_str(),
                    %error,
                    "Auto-save failed"
                );
                if let Some(on_error) = &self.on_error {
                    on_error(&error);
                }
                Err(error)
            }
        }
    }
}

/// Snapshots form state into the [`DraftStore`] after a quiet period.
///
/// Feed every new form snapshot to [`AutoSave::update`]. Identical content
/// is never saved twice; a burst of changes produces a single save.
pub struct AutoSave {
    inner: Arc<Inner>,
}

impl AutoSave {
    /// Create a controller; an existing draft seeds `last_saved` and the
    /// change baseline without triggering a save.
    pub fn new(drafts: DraftStore, options: AutoSaveOptions) -> Self {
        Self::build(drafts, options, None, None)
    }

    /// Create a controller with save/error notifications.
    pub fn with_callbacks(
        drafts: DraftStore,
        options: AutoSaveOptions,
        on_save: impl Fn(&Value) + Send + Sync + 'static,
        on_error: impl Fn(&StorageError) + Send + Sync + 'static,
    ) -> Self {
        Self::build(
            drafts,
            options,
            Some(Arc::new(on_save)),
            Some(Arc::new(on_error)),
        )
    }

    fn build(
        drafts: DraftStore,
        options: AutoSaveOptions,
        on_save: Option<SaveCallback>,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let mut state = SaveState::default();
        if let Some(draft) = drafts.get_draft(&options.form_id) {
            state.last_saved = Some(draft.saved_at);
            state.baseline = draft.data.to_string();
        }

        Self {
            inner: Arc::new(Inner {
                drafts,
                debouncer: Debouncer::new(options.delay),
                options,
                state: Mutex::new(state),
                on_save,
                on_error,
            }),
        }
    }

    /// Record the latest form snapshot and (re)arm the save timer if it
    /// differs from what was last saved.
    pub fn update(&self, snapshot: Value) {
        if !self.inner.options.enabled {
            return;
        }

        self.inner.debouncer.cancel();

        let serialized = snapshot.to_string();
        let changed = {
            let mut state = self.inner.state();
            let changed = serialized != state.baseline;
            state.current = Some(snapshot);
            changed
        };
        if !changed {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(move || async move {
            if let Some(inner) = weak.upgrade() {
                // Failures are recorded in the status and reported through on_error.
                let _ = inner.save_current();
            }
        });
    }

    /// Save the latest snapshot immediately, bypassing the timer.
    ///
    /// Returns `Ok(None)` when disabled or when no snapshot was provided yet.
    pub fn save_now(&self) -> Result<Option<Draft>, StorageError> {
        if !self.inner.options.enabled {
            return Ok(None);
        }
        self.inner.debouncer.cancel();
        self.inner.save_current()
    }

    /// Drop any pending save, e.g. after the form was submitted.
    pub fn cancel(&self) -> bool {
        self.inner.debouncer.cancel()
    }

    pub fn status(&self) -> AutoSaveStatus {
        let pending = self.inner.debouncer.is_pending();
        let state = self.inner.state();
        AutoSaveStatus {
            is_saving: state.is_saving,
            last_saved: state.last_saved,
            error: state.error.clone(),
            pending,
        }
    }

    pub fn form_id(&self) -> &str {
        &self.inner.options.form_id
    }
}
