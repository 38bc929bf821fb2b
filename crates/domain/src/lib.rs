mod commands;
mod display;
mod events;
mod merge;
mod models;
mod overrides;
pub mod protocol;
mod thread;

pub use commands::{Mutation, MutationKind, ParseMutationError};
pub use display::{relative_label, timestamp_label};
pub use events::SyncEvent;
pub use merge::{match_pending, merge, MergeInput};
pub use models::{
    AuthorIdentity, CacheLookup, CachedIdentity, Comment, CommentId, LikeState, Origin,
    PendingEntry, Thread, Viewer, ANONYMOUS, TEMP_PREFIX,
};
pub use overrides::OverrideRecord;
pub use thread::assemble;
