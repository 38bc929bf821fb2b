use domain::CommentId;
use std::fmt;

/// Namespaced key of one persisted cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Override(CommentId),
    Identity(CommentId),
    Like(CommentId),
}

const OVERRIDE: &str = "override:";
const IDENTITY: &str = "identity:";
const LIKE: &str = "like:";

impl CacheKey {
    pub fn parse(key: &str) -> Option<Self> {
        let (ctor, id): (fn(CommentId) -> CacheKey, &str) =
            if let Some(id) = key.strip_prefix(OVERRIDE) {
                (CacheKey::Override, id)
            } else if let Some(id) = key.strip_prefix(IDENTITY) {
                (CacheKey::Identity, id)
            } else if let Some(id) = key.strip_prefix(LIKE) {
                (CacheKey::Like, id)
            } else {
                return None;
            };
        (!id.is_empty()).then(|| ctor(CommentId::from(id)))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Override(id) => write!(f, "{OVERRIDE}{id}"),
            CacheKey::Identity(id) => write!(f, "{IDENTITY}{id}"),
            CacheKey::Like(id) => write!(f, "{LIKE}{id}"),
        }
    }
}
