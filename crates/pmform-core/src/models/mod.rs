//! Data models for pmform

mod draft;
mod submission;

pub use draft::Draft;
pub use submission::{
    QueueStats, QueuedSubmission, SubmissionId, SubmissionStatus, SyncReport,
};
