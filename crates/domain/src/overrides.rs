use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Comment;

/// User-local correction for one comment. Every present field wins over server data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Local edit time, milliseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ticks: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
}

impl OverrideRecord {
    pub fn edit(content: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            content: Some(content.into()),
            timestamp_ticks: Some(at.timestamp_millis()),
            ..Self::default()
        }
    }

    pub fn like(liked: bool, like_count: u32) -> Self {
        Self {
            liked: Some(liked),
            like_count: Some(like_count),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.timestamp_ticks.is_none()
            && self.like_count.is_none()
            && self.liked.is_none()
    }

    /// Fields present in `partial` replace ours; absent ones are left untouched.
    pub fn merge(&mut self, partial: &OverrideRecord) {
        if let Some(content) = &partial.content {
            self.content = Some(content.clone());
        }
        if let Some(ticks) = partial.timestamp_ticks {
            self.timestamp_ticks = Some(ticks);
        }
        if let Some(count) = partial.like_count {
            self.like_count = Some(count);
        }
        if let Some(liked) = partial.liked {
            self.liked = Some(liked);
        }
    }

    pub fn edited_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ticks
            .and_then(|ticks| Utc.timestamp_millis_opt(ticks).single())
    }

    pub fn apply_to(&self, comment: &mut Comment) {
        if let Some(content) = &self.content {
            comment.content = content.clone();
        }
        if let Some(at) = self.edited_at() {
            comment.edited_at = Some(at);
        }
        if let Some(count) = self.like_count {
            comment.like_count = count;
        }
        if let Some(liked) = self.liked {
            comment.liked = liked;
        }
    }

    /// Drops the parts a fresh server copy already reflects.
    ///
    /// Content is settled once the server holds the same text or was updated at or after
    /// the local edit; likes are settled once the server count matches.
    pub fn settled_by(&self, server: &Comment) -> OverrideRecord {
        let mut rest = self.clone();
        let content_settled = match (&self.content, self.edited_at()) {
            (Some(content), _) if *content == server.content => true,
            (Some(_), Some(edit)) => server.updated_at.is_some_and(|u| u >= edit),
            (Some(_), None) => false,
            (None, _) => true,
        };
        if content_settled {
            rest.content = None;
            rest.timestamp_ticks = None;
        }
        if self.like_count.is_some_and(|count| count == server.like_count) {
            rest.like_count = None;
            rest.liked = None;
        }
        rest
    }
}
