use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::CommentId;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    #[serde(skip)]
    pub thread_id: String,
    pub content: String,
    pub parent_id: Option<CommentId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateReply {
    /// Raw canonical entity, when the backend bothered to send one back
    pub comment: Option<Value>,
    pub success: bool,
    pub message: Option<String>,
}

impl CreateReply {
    /// The backend's "you already sent this" answer.
    pub fn is_duplicate(&self) -> bool {
        self.message.as_deref().is_some_and(|m| {
            let m = m.to_lowercase();
            m.contains("duplicate") || m.contains("trùng")
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReply {
    pub content: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
}

/// The networking layer as the sync engine sees it: each call resolves once, or fails.
#[async_trait]
pub trait CommentBackend: Send + Sync {
    /// Flat list of raw comment payloads for a thread, replies included.
    async fn fetch_comments(&self, thread_id: &str) -> Result<Vec<Value>>;
    async fn create_comment(&self, new: &NewComment) -> Result<CreateReply>;
    async fn update_comment(&self, id: &CommentId, content: &str) -> Result<UpdateReply>;
    async fn delete_comment(&self, id: &CommentId) -> Result<Ack>;
    async fn like_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack>;
    async fn unlike_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message_detection() {
        let reply = |m: &str| CreateReply {
            comment: None,
            success: false,
            message: Some(m.to_string()),
        };
        assert!(reply("Duplicate comment").is_duplicate());
        assert!(reply("Bình luận bị trùng lặp").is_duplicate());
        assert!(!reply("Rate limited").is_duplicate());
        assert!(!CreateReply::default().is_duplicate());
    }
}
