//! Error types for the scheduler.

use thiserror::Error;

use quill_store::{ArticleId, FailureKind, JobId, JobKind, SiteId, StoreError, TopicId};

use crate::CollaboratorError;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Collaborator error outside a job handler (onboarding, planning).
    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Site not found.
    #[error("site not found: {0}")]
    SiteNotFound(SiteId),

    /// Job not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Article not found, or owned by another site.
    #[error("article not found: {0}")]
    ArticleNotFound(ArticleId),
}

/// Why a job handler failed. Recorded on the job, never raised to the caller.
#[derive(Debug, Error)]
pub enum JobError {
    /// A site-scoped job was enqueued without a site.
    #[error("{0} job has no site")]
    MissingSite(JobKind),

    #[error("site not found: {0}")]
    SiteNotFound(SiteId),

    #[error("topic not found: {0}")]
    TopicNotFound(TopicId),

    #[error("article not found: {0}")]
    ArticleNotFound(ArticleId),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JobError {
    /// Whether recovery should retry the job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            JobError::Collaborator(e) => e.failure_kind(),
            JobError::Store(StoreError::NotFound { .. } | StoreError::Corrupt(_)) => {
                FailureKind::Permanent
            }
            JobError::Store(_) => FailureKind::Transient,
            JobError::MissingSite(_)
            | JobError::SiteNotFound(_)
            | JobError::TopicNotFound(_)
            | JobError::ArticleNotFound(_) => FailureKind::Permanent,
        }
    }
}
