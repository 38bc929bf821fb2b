//! Normalization of server comment payloads.
//!
//! The backend has shipped several shapes over time: camelCase and snake_case keys,
//! author info nested under different containers or flattened onto the comment, and
//! sometimes no author info at all. Every field is resolved through an ordered key list
//! and degrades to a placeholder instead of failing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::models::{
    AuthorIdentity, CacheLookup, CachedIdentity, Comment, CommentId, LikeState, Origin, ANONYMOUS,
};

const ID_KEYS: &[&str] = &["id", "_id", "commentId", "comment_id"];
const CONTENT_KEYS: &[&str] = &["content", "text", "body", "message"];
const PARENT_KEYS: &[&str] = &["parentId", "parent_id", "replyTo", "reply_to", "parent"];
const LIKE_COUNT_KEYS: &[&str] = &["likeCount", "like_count", "likesCount", "likes"];
const LIKED_KEYS: &[&str] = &["isLiked", "liked", "is_liked", "likedByMe"];
const REPLY_COUNT_KEYS: &[&str] = &["replyCount", "reply_count", "repliesCount"];
const CREATED_KEYS: &[&str] = &["createdAt", "created_at", "CreatedAt"];
const UPDATED_KEYS: &[&str] = &["updatedAt", "updated_at", "UpdatedAt"];
const NESTED_REPLIES_KEYS: &[&str] = &["replies", "children"];

const AUTHOR_CONTAINERS: &[&str] = &["author", "user", "User", "Author", "owner", "createdBy"];
const AUTHOR_ID_KEYS: &[&str] = &["id", "_id", "userId", "user_id"];
const DISPLAY_NAME_KEYS: &[&str] = &[
    "displayName",
    "display_name",
    "fullName",
    "full_name",
    "fullname",
    "name",
];
const USERNAME_KEYS: &[&str] = &["username", "userName", "user_name", "handle"];
const AVATAR_KEYS: &[&str] = &["avatar", "avatarUrl", "avatar_url", "image"];

// 扁平结构：作者字段直接挂在评论上
const FLAT_AUTHOR_ID_KEYS: &[&str] = &["authorId", "author_id", "userId", "user_id"];
const FLAT_DISPLAY_NAME_KEYS: &[&str] = &["authorName", "author_name", "displayName"];
const FLAT_USERNAME_KEYS: &[&str] = &["authorUsername", "author_username", "username"];
const FLAT_AVATAR_KEYS: &[&str] = &["authorAvatar", "author_avatar", "avatarUrl"];

/// A canonical comment plus the cache facts its payload stated explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub comment: Comment,
    /// Identity resolved from payload fields while the cache had none for this id.
    pub identity: Option<CachedIdentity>,
    /// Like membership stated by the payload itself.
    pub like_state: Option<LikeState>,
}

/// Maps one raw payload to the canonical shape. Returns `None` only when no id can be found.
pub fn normalize<C>(raw: &Value, cache: &C) -> Option<Normalized>
where
    C: CacheLookup + ?Sized,
{
    let obj = raw.as_object()?;
    let id = CommentId::new(first_text(obj, ID_KEYS)?);

    let content = CONTENT_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let parent_id = PARENT_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(reference_id))
        .map(CommentId::new);

    let fields = author_fields(obj);
    let cached = cache.identity(&id);
    let name = fields
        .display_name
        .clone()
        .or_else(|| fields.username.clone())
        .or_else(|| cached.as_ref().map(|c| c.name.clone()))
        .unwrap_or_else(|| ANONYMOUS.to_string());
    let handle = fields
        .username
        .clone()
        .or_else(|| cached.as_ref().map(|c| c.handle.clone()))
        .unwrap_or_default();
    let identity = (cached.is_none()
        && (fields.display_name.is_some() || fields.username.is_some()))
    .then(|| CachedIdentity {
        name: name.clone(),
        handle: handle.clone(),
    });

    let explicit_liked = LIKED_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(as_flag));
    let explicit_count = LIKE_COUNT_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(as_count));
    let cached_like = cache.like_state(&id);
    let liked = explicit_liked
        .or(cached_like.map(|l| l.liked))
        .unwrap_or(false);
    let like_count = explicit_count
        .or(cached_like.map(|l| l.like_count))
        .unwrap_or(0);
    // 只有两个字段都由服务端给出时才写回缓存
    let like_state = explicit_liked
        .zip(explicit_count)
        .map(|(liked, like_count)| LikeState { liked, like_count });

    let reply_count = REPLY_COUNT_KEYS
        .iter()
        .find_map(|k| obj.get(*k).and_then(as_count))
        .unwrap_or(0);

    let comment = Comment {
        id,
        content,
        parent_id,
        like_count,
        liked,
        reply_count,
        author: AuthorIdentity {
            id: fields.id,
            name,
            handle,
            avatar: fields.avatar,
        },
        created_at: CREATED_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(parse_time)),
        updated_at: UPDATED_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(parse_time)),
        edited_at: None,
        timestamp: String::new(),
        origin: Origin::Confirmed,
    };

    Some(Normalized {
        comment,
        identity,
        like_state,
    })
}

/// Normalizes a fetched list, flattening replies some shapes nest inside their parent.
///
/// Payloads without an id are dropped; the count of dropped entries is returned alongside.
pub fn normalize_all<C>(raws: &[Value], cache: &C) -> (Vec<Normalized>, usize)
where
    C: CacheLookup + ?Sized,
{
    let mut out = Vec::with_capacity(raws.len());
    let mut skipped = 0;
    for raw in raws {
        collect(raw, None, cache, &mut out, &mut skipped);
    }
    (out, skipped)
}

fn collect<C>(
    raw: &Value,
    inherited_parent: Option<&CommentId>,
    cache: &C,
    out: &mut Vec<Normalized>,
    skipped: &mut usize,
) where
    C: CacheLookup + ?Sized,
{
    let Some(mut normalized) = normalize(raw, cache) else {
        *skipped += 1;
        return;
    };
    if normalized.comment.parent_id.is_none() {
        normalized.comment.parent_id = inherited_parent.cloned();
    }
    let id = normalized.comment.id.clone();
    out.push(normalized);

    let nested = raw.as_object().and_then(|obj| {
        NESTED_REPLIES_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
    });
    for child in nested.into_iter().flatten() {
        collect(child, Some(&id), cache, out, skipped);
    }
}

/// Content key used to recognise a pending comment in server data.
pub fn normalize_content(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct AuthorFields {
    id: Option<String>,
    display_name: Option<String>,
    username: Option<String>,
    avatar: Option<String>,
}

fn author_fields(obj: &Map<String, Value>) -> AuthorFields {
    let container = AUTHOR_CONTAINERS.iter().find_map(|k| obj.get(*k));
    let nested = container.and_then(Value::as_object);
    // 有些接口只给一个用户名字符串
    let bare_username = container.and_then(as_text);

    AuthorFields {
        id: nested
            .and_then(|a| first_text(a, AUTHOR_ID_KEYS))
            .or_else(|| first_text(obj, FLAT_AUTHOR_ID_KEYS)),
        display_name: nested
            .and_then(|a| first_text(a, DISPLAY_NAME_KEYS))
            .or_else(|| first_text(obj, FLAT_DISPLAY_NAME_KEYS)),
        username: nested
            .and_then(|a| first_text(a, USERNAME_KEYS))
            .or(bare_username)
            .or_else(|| first_text(obj, FLAT_USERNAME_KEYS)),
        avatar: nested
            .and_then(|a| first_text(a, AVATAR_KEYS))
            .or_else(|| first_text(obj, FLAT_AVATAR_KEYS)),
    }
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(as_text))
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn reference_id(v: &Value) -> Option<String> {
    match v {
        Value::Object(obj) => first_text(obj, ID_KEYS),
        other => as_text(other),
    }
}

fn as_count(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .or_else(|| n.as_i64().map(|_| 0)),
        Value::Array(items) => Some(u32::try_from(items.len()).unwrap_or(u32::MAX)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn parse_time(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
