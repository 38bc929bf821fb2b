use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TEMP_PREFIX: &str = "temp_";

/// Author label used when neither the payload nor the identity cache knows who wrote a comment.
pub const ANONYMOUS: &str = "Ẩn danh";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Client-side id for a comment the server has not confirmed yet.
    ///
    /// The random suffix keeps two submissions within the same millisecond apart.
    pub fn temp(now: DateTime<Utc>) -> Self {
        let suffix: u32 = rand::random();
        Self(format!(
            "{}{}_{:08x}",
            TEMP_PREFIX,
            now.timestamp_millis(),
            suffix
        ))
    }

    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub id: Option<String>,
    pub name: String,
    pub handle: String,
    pub avatar: Option<String>,
}

impl AuthorIdentity {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            name: ANONYMOUS.to_string(),
            handle: String::new(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: String,
    pub name: String,
    pub handle: String,
    pub avatar: Option<String>,
}

impl Viewer {
    pub fn identity(&self) -> AuthorIdentity {
        AuthorIdentity {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            handle: self.handle.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    Pending,
    #[default]
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub parent_id: Option<CommentId>,
    pub like_count: u32,
    pub liked: bool,
    pub reply_count: u32,
    pub author: AuthorIdentity,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Local edit time recorded in the override store
    pub edited_at: Option<DateTime<Utc>>,
    pub timestamp: String,
    #[serde(skip)]
    pub origin: Origin,
}

impl Comment {
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn latest_activity(&self) -> Option<DateTime<Utc>> {
        [self.created_at, self.updated_at, self.edited_at]
            .into_iter()
            .flatten()
            .max()
    }

    pub fn is_edited(&self) -> bool {
        if self.edited_at.is_some() {
            return true;
        }
        match (self.created_at, self.updated_at) {
            (Some(created), Some(updated)) => updated > created,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub parent: Comment,
    pub replies: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub temp_id: CommentId,
    pub content: String,
    pub parent_id: Option<CommentId>,
    pub created_at_local: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Author identity as first resolved for a comment id. Written once, never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedIdentity {
    pub name: String,
    pub handle: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u32,
}

/// Read access to the persisted identity and like caches.
pub trait CacheLookup {
    fn identity(&self, id: &CommentId) -> Option<CachedIdentity>;
    fn like_state(&self, id: &CommentId) -> Option<LikeState>;
}

impl CacheLookup for () {
    fn identity(&self, _id: &CommentId) -> Option<CachedIdentity> {
        None
    }

    fn like_state(&self, _id: &CommentId) -> Option<LikeState> {
        None
    }
}
