use domain::CommentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("comment content is empty")]
    EmptyContent,
    #[error("the same comment is already being submitted")]
    AlreadySubmitting,
    #[error("duplicate submission: {0}")]
    Duplicate(String),
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("comment {0} is not confirmed by the server yet")]
    NotConfirmed(CommentId),
    #[error("comment {0} not found in this thread")]
    NotFound(CommentId),
    #[error("backend request failed: {0:#}")]
    Backend(#[source] anyhow::Error),
    #[error("local cache write failed: {0:#}")]
    Storage(#[source] anyhow::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
