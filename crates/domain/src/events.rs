use crate::commands::MutationKind;
use crate::models::CommentId;

/// Notifications a thread view broadcasts to whoever renders it.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ThreadChanged { thread_id: String },
    /// A pending entry got no confirmation in time and was dropped silently.
    PendingExpired { temp_id: CommentId },
    Warning { message: String },
    MutationFailed {
        kind: MutationKind,
        id: CommentId,
        reason: String,
    },
}
