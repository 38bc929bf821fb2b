use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::protocol::parse_time;
use domain::CommentId;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::{Ack, CommentBackend, CreateReply, NewComment, UpdateReply};

const LIST_KEYS: &[&str] = &["data", "comments", "items", "results"];
const ENTITY_KEYS: &[&str] = &["comment", "data", "result"];
const MESSAGE_KEYS: &[&str] = &["message", "error", "detail"];

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub token: Option<String>,
}

pub struct RestBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl RestBackend {
    pub fn new(config: &RestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn ack(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Ack> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .with_context(|| format!("{} request failed", what))?;
        let status = resp.status();
        let body = read_body(resp).await;
        if status.is_server_error() {
            anyhow::bail!("{} failed with {}: {}", what, status, body);
        }
        Ok(Ack {
            success: body
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(status.is_success()),
        })
    }
}

/// Body as JSON; empty or non-JSON bodies read as `Null`.
async fn read_body(resp: Response) -> Value {
    match resp.bytes().await {
        Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            debug!("Response body is not JSON: {}", e);
            Value::Null
        }),
        _ => Value::Null,
    }
}

/// The comment list, whether the server sends a bare array or wraps it.
pub(crate) fn unwrap_list(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            for key in LIST_KEYS {
                match obj.remove(*key) {
                    Some(Value::Array(items)) => return items,
                    Some(inner @ Value::Object(_)) => return unwrap_list(inner),
                    _ => {}
                }
            }
            warn!("Comment list response has no recognisable list");
            Vec::new()
        }
        _ => Vec::new(),
    }
}

fn looks_like_entity(obj: &Map<String, Value>) -> bool {
    ["id", "_id", "commentId", "comment_id"]
        .iter()
        .any(|k| obj.contains_key(*k))
}

fn find_entity(body: &Value) -> Option<Value> {
    let obj = body.as_object()?;
    for key in ENTITY_KEYS {
        if let Some(inner) = obj.get(*key).filter(|v| v.is_object()) {
            return find_entity(inner).or_else(|| Some(inner.clone()));
        }
    }
    looks_like_entity(obj).then(|| body.clone())
}

pub(crate) fn parse_create_reply(body: &Value, status: StatusCode) -> CreateReply {
    let success = body
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(status.is_success());
    let message = MESSAGE_KEYS
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    let comment = success.then(|| find_entity(body)).flatten();
    CreateReply {
        comment,
        success,
        message,
    }
}

pub(crate) fn parse_update_reply(body: &Value, sent: &str) -> UpdateReply {
    let entity = find_entity(body).unwrap_or(Value::Null);
    let content = ["content", "text", "body"]
        .iter()
        .find_map(|k| entity.get(*k).and_then(Value::as_str))
        .unwrap_or(sent)
        .to_string();
    let updated_at = ["updatedAt", "updated_at"]
        .iter()
        .find_map(|k| entity.get(*k).and_then(parse_time));
    UpdateReply {
        content,
        updated_at,
    }
}

#[async_trait]
impl CommentBackend for RestBackend {
    async fn fetch_comments(&self, thread_id: &str) -> Result<Vec<Value>> {
        let resp = self
            .authorize(self.client.get(self.url(&format!("threads/{}/comments", thread_id))))
            .send()
            .await
            .context("Fetch comments request failed")?
            .error_for_status()?;
        let body = read_body(resp).await;
        Ok(unwrap_list(body))
    }

    async fn create_comment(&self, new: &NewComment) -> Result<CreateReply> {
        let resp = self
            .authorize(
                self.client
                    .post(self.url(&format!("threads/{}/comments", new.thread_id)))
                    .json(new),
            )
            .send()
            .await
            .context("Create comment request failed")?;
        let status = resp.status();
        let body = read_body(resp).await;
        // 4xx 带消息体的视为业务拒绝（例如重复评论），其余错误按传输失败处理
        if status.is_server_error() || (status.is_client_error() && body.is_null()) {
            anyhow::bail!("Create comment failed with {}", status);
        }
        Ok(parse_create_reply(&body, status))
    }

    async fn update_comment(&self, id: &CommentId, content: &str) -> Result<UpdateReply> {
        let resp = self
            .authorize(
                self.client
                    .put(self.url(&format!("comments/{}", id)))
                    .json(&json!({ "content": content })),
            )
            .send()
            .await
            .context("Update comment request failed")?
            .error_for_status()?;
        let body = read_body(resp).await;
        Ok(parse_update_reply(&body, content))
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<Ack> {
        self.ack(
            self.client.delete(self.url(&format!("comments/{}", id))),
            "Delete comment",
        )
        .await
    }

    async fn like_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack> {
        self.ack(
            self.client
                .post(self.url(&format!("comments/{}/likes", id)))
                .json(&json!({ "userId": user_id })),
            "Like comment",
        )
        .await
    }

    async fn unlike_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack> {
        self.ack(
            self.client
                .delete(self.url(&format!("comments/{}/likes/{}", id, user_id))),
            "Unlike comment",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_list_shapes() {
        assert_eq!(unwrap_list(json!([{"id": 1}])).len(), 1);
        assert_eq!(unwrap_list(json!({"data": [{"id": 1}, {"id": 2}]})).len(), 2);
        assert_eq!(
            unwrap_list(json!({"data": {"comments": [{"id": 1}]}})).len(),
            1
        );
        assert!(unwrap_list(json!({"total": 0})).is_empty());
        assert!(unwrap_list(Value::Null).is_empty());
    }

    #[test]
    fn test_create_reply_with_wrapped_entity() {
        let body = json!({"success": true, "data": {"comment": {"id": "c7", "content": "hi"}}});
        let reply = parse_create_reply(&body, StatusCode::CREATED);
        assert!(reply.success);
        assert_eq!(reply.comment, Some(json!({"id": "c7", "content": "hi"})));
    }

    #[test]
    fn test_create_reply_bare_entity_and_ack_only() {
        let bare = parse_create_reply(&json!({"_id": "c8", "text": "yo"}), StatusCode::OK);
        assert!(bare.success);
        assert!(bare.comment.is_some());

        let ack_only = parse_create_reply(&json!({"success": true}), StatusCode::OK);
        assert!(ack_only.success);
        assert!(ack_only.comment.is_none());
    }

    #[test]
    fn test_create_reply_rejection() {
        let body = json!({"success": false, "message": "Duplicate comment"});
        let reply = parse_create_reply(&body, StatusCode::CONFLICT);
        assert!(!reply.success);
        assert!(reply.is_duplicate());
        assert!(reply.comment.is_none());

        let implicit = parse_create_reply(&json!({"error": "too fast"}), StatusCode::TOO_MANY_REQUESTS);
        assert!(!implicit.success);
        assert_eq!(implicit.message.as_deref(), Some("too fast"));
    }

    #[test]
    fn test_update_reply_falls_back_to_sent_content() {
        let reply = parse_update_reply(
            &json!({"comment": {"id": "c1", "content": "server text", "updatedAt": "2024-05-01T10:00:00Z"}}),
            "sent",
        );
        assert_eq!(reply.content, "server text");
        assert!(reply.updated_at.is_some());

        let empty = parse_update_reply(&Value::Null, "sent");
        assert_eq!(empty.content, "sent");
        assert!(empty.updated_at.is_none());
    }
}
