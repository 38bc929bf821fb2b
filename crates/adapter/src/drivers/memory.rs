use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::protocol::normalize_content;
use domain::{CommentId, Viewer};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::traits::{Ack, CommentBackend, CreateReply, NewComment, UpdateReply};

/// Window in which the same author posting the same text counts as a duplicate.
const DUPLICATE_WINDOW_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Create,
    Update,
    Delete,
    Like,
    Unlike,
}

/// Behaviour switches for simulating a misbehaving server.
#[derive(Debug, Clone, Default)]
pub struct Knobs {
    /// Delay applied to every call before it touches state
    pub latency: Duration,
    /// Creates never resolve
    pub hang_creates: bool,
    /// Successful creates answer `success: true` without the entity
    pub omit_created_entity: bool,
    /// Fetched payloads carry no author fields at all
    pub strip_author: bool,
}

struct Stored {
    id: CommentId,
    seq: u64,
    thread_id: String,
    content: String,
    parent_id: Option<CommentId>,
    author: Viewer,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    likers: BTreeSet<String>,
}

#[derive(Default)]
struct World {
    comments: Vec<Stored>,
    next_seq: u64,
    failures: HashMap<Op, u32>,
    knobs: Knobs,
}

/// In-process comment server.
///
/// Keeps the same contract as the REST service, including its habit of answering
/// in one of several payload shapes.
pub struct MemoryBackend {
    actor: Viewer,
    world: Mutex<World>,
}

impl MemoryBackend {
    /// `actor` is the authenticated user: creates are attributed to them and
    /// `isLiked` is computed from their point of view.
    pub fn new(actor: Viewer) -> Self {
        Self {
            actor,
            world: Mutex::new(World::default()),
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_knobs(&self, knobs: Knobs) {
        self.world().knobs = knobs;
    }

    pub fn knobs(&self) -> Knobs {
        self.world().knobs.clone()
    }

    /// Makes the next call of kind `op` fail with a transport error.
    pub fn fail_next(&self, op: Op) {
        *self.world().failures.entry(op).or_default() += 1;
    }

    /// Inserts a comment directly, as if another client had posted it.
    pub fn seed(
        &self,
        thread_id: &str,
        author: &Viewer,
        content: &str,
        parent_id: Option<&CommentId>,
    ) -> CommentId {
        let mut world = self.world();
        insert(&mut world, thread_id, author, content, parent_id.cloned())
    }

    /// Edits a comment directly, bypassing the client.
    pub fn server_edit(&self, id: &CommentId, content: &str) -> bool {
        let mut world = self.world();
        match world.comments.iter_mut().find(|c| &c.id == id) {
            Some(c) => {
                c.content = content.to_string();
                c.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &CommentId) -> bool {
        remove_cascade(&mut self.world(), id)
    }

    pub fn like_count(&self, id: &CommentId) -> Option<usize> {
        self.world()
            .comments
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.likers.len())
    }

    pub fn content_of(&self, id: &CommentId) -> Option<String> {
        self.world()
            .comments
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.content.clone())
    }

    pub fn len(&self) -> usize {
        self.world().comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Latency plus injected failure for `op`. The lock is released before sleeping.
    async fn enter(&self, op: Op) -> Result<()> {
        let latency = self.world().knobs.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut world = self.world();
        if let Some(n) = world.failures.get_mut(&op) {
            if *n > 0 {
                *n -= 1;
                debug!("Injected failure for {:?}", op);
                return Err(anyhow!("simulated network failure during {:?}", op));
            }
        }
        Ok(())
    }
}

fn insert(
    world: &mut World,
    thread_id: &str,
    author: &Viewer,
    content: &str,
    parent_id: Option<CommentId>,
) -> CommentId {
    world.next_seq += 1;
    let id = CommentId::new(format!("c{}", world.next_seq));
    let now = Utc::now();
    world.comments.push(Stored {
        id: id.clone(),
        seq: world.next_seq,
        thread_id: thread_id.to_string(),
        content: content.to_string(),
        parent_id,
        author: author.clone(),
        created_at: now,
        updated_at: now,
        likers: BTreeSet::new(),
    });
    id
}

fn remove_cascade(world: &mut World, id: &CommentId) -> bool {
    let mut doomed: HashSet<CommentId> = HashSet::from([id.clone()]);
    // 级联删除所有后代
    loop {
        let before = doomed.len();
        for c in &world.comments {
            if c.parent_id.as_ref().is_some_and(|p| doomed.contains(p)) {
                doomed.insert(c.id.clone());
            }
        }
        if doomed.len() == before {
            break;
        }
    }
    let before = world.comments.len();
    world.comments.retain(|c| !doomed.contains(&c.id));
    world.comments.len() != before
}

fn reply_count(world: &World, id: &CommentId) -> usize {
    world
        .comments
        .iter()
        .filter(|c| c.parent_id.as_ref() == Some(id))
        .count()
}

/// Renders a stored comment in one of three historical payload shapes, picked by sequence.
fn render(c: &Stored, replies: usize, actor_id: &str, strip_author: bool) -> Value {
    let liked = c.likers.contains(actor_id);
    let mut payload = match c.seq % 3 {
        1 => json!({
            "id": c.id,
            "content": c.content,
            "parentId": c.parent_id,
            "likeCount": c.likers.len(),
            "isLiked": liked,
            "replyCount": replies,
            "createdAt": c.created_at.to_rfc3339(),
            "updatedAt": c.updated_at.to_rfc3339(),
            "author": {
                "id": c.author.id,
                "displayName": c.author.name,
                "username": c.author.handle,
                "avatar": c.author.avatar,
            },
        }),
        2 => json!({
            "_id": c.id,
            "text": c.content,
            "parent_id": c.parent_id,
            "like_count": c.likers.len(),
            "reply_count": replies,
            "created_at": c.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "updated_at": c.updated_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            "user": {
                "_id": c.author.id,
                "full_name": c.author.name,
                "user_name": c.author.handle,
            },
        }),
        _ => json!({
            "commentId": c.id,
            "body": c.content,
            "replyTo": c.parent_id,
            "likes": c.likers.iter().collect::<Vec<_>>(),
            "likedByMe": liked,
            "createdAt": c.created_at.timestamp_millis(),
            "updatedAt": c.updated_at.timestamp_millis(),
            "authorId": c.author.id,
            "authorName": c.author.name,
            "authorUsername": c.author.handle,
        }),
    };
    if strip_author {
        if let Some(obj) = payload.as_object_mut() {
            for key in [
                "author",
                "user",
                "authorId",
                "authorName",
                "authorUsername",
            ] {
                obj.remove(key);
            }
        }
    }
    payload
}

#[async_trait]
impl CommentBackend for MemoryBackend {
    async fn fetch_comments(&self, thread_id: &str) -> Result<Vec<Value>> {
        self.enter(Op::Fetch).await?;
        let world = self.world();

        let mut top: Vec<&Stored> = Vec::new();
        let mut replies: Vec<&Stored> = Vec::new();
        for c in world.comments.iter().filter(|c| c.thread_id == thread_id) {
            if c.parent_id.is_some() {
                replies.push(c);
            } else {
                top.push(c);
            }
        }
        // 顶层评论新的在前，回复按时间顺序
        top.sort_by(|a, b| (b.created_at, b.seq).cmp(&(a.created_at, a.seq)));
        replies.sort_by_key(|c| (c.created_at, c.seq));

        let strip = world.knobs.strip_author;
        Ok(top
            .into_iter()
            .chain(replies)
            .map(|c| render(c, reply_count(&world, &c.id), &self.actor.id, strip))
            .collect())
    }

    async fn create_comment(&self, new: &NewComment) -> Result<CreateReply> {
        self.enter(Op::Create).await?;
        let hang = self.world().knobs.hang_creates;
        if hang {
            debug!("Create for thread {} will never resolve", new.thread_id);
            std::future::pending::<()>().await;
        }

        let mut world = self.world();
        let key = normalize_content(&new.content);
        let cutoff = Utc::now() - ChronoDuration::seconds(DUPLICATE_WINDOW_SECS);
        let duplicate = world.comments.iter().any(|c| {
            c.thread_id == new.thread_id
                && c.author.id == self.actor.id
                && c.created_at >= cutoff
                && normalize_content(&c.content) == key
        });
        if duplicate {
            info!("Rejecting duplicate comment in thread {}", new.thread_id);
            return Ok(CreateReply {
                comment: None,
                success: false,
                message: Some("Duplicate comment".to_string()),
            });
        }

        if let Some(parent) = &new.parent_id {
            if !world.comments.iter().any(|c| &c.id == parent) {
                return Ok(CreateReply {
                    comment: None,
                    success: false,
                    message: Some(format!("Parent comment {} not found", parent)),
                });
            }
        }

        let id = insert(
            &mut world,
            &new.thread_id,
            &self.actor,
            &new.content,
            new.parent_id.clone(),
        );
        let comment = if world.knobs.omit_created_entity {
            None
        } else {
            world
                .comments
                .iter()
                .find(|c| c.id == id)
                .map(|c| render(c, 0, &self.actor.id, false))
        };
        Ok(CreateReply {
            comment,
            success: true,
            message: None,
        })
    }

    async fn update_comment(&self, id: &CommentId, content: &str) -> Result<UpdateReply> {
        self.enter(Op::Update).await?;
        let mut world = self.world();
        let stored = world
            .comments
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| anyhow!("comment {} not found", id))?;
        stored.content = content.to_string();
        stored.updated_at = Utc::now();
        Ok(UpdateReply {
            content: stored.content.clone(),
            updated_at: Some(stored.updated_at),
        })
    }

    async fn delete_comment(&self, id: &CommentId) -> Result<Ack> {
        self.enter(Op::Delete).await?;
        let success = remove_cascade(&mut self.world(), id);
        Ok(Ack { success })
    }

    async fn like_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack> {
        self.enter(Op::Like).await?;
        let mut world = self.world();
        let stored = world
            .comments
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| anyhow!("comment {} not found", id))?;
        stored.likers.insert(user_id.to_string());
        Ok(Ack { success: true })
    }

    async fn unlike_comment(&self, id: &CommentId, user_id: &str) -> Result<Ack> {
        self.enter(Op::Unlike).await?;
        let mut world = self.world();
        let stored = world
            .comments
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| anyhow!("comment {} not found", id))?;
        stored.likers.remove(user_id);
        Ok(Ack { success: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::protocol::normalize_all;

    fn viewer(id: &str, name: &str) -> Viewer {
        Viewer {
            id: id.to_string(),
            name: name.to_string(),
            handle: format!("{}_handle", id),
            avatar: None,
        }
    }

    fn new_comment(content: &str, parent_id: Option<CommentId>) -> NewComment {
        NewComment {
            thread_id: "post-1".to_string(),
            content: content.to_string(),
            parent_id,
        }
    }

    #[tokio::test]
    async fn test_every_shape_normalizes() {
        let me = viewer("u1", "Minh");
        let backend = MemoryBackend::new(me.clone());
        let root = backend.seed("post-1", &me, "first", None);
        backend.seed("post-1", &viewer("u2", "Lan"), "second", Some(&root));
        backend.seed("post-1", &me, "third", None);
        backend.seed("post-2", &me, "elsewhere", None);

        let raws = backend.fetch_comments("post-1").await.unwrap();
        let (comments, skipped) = normalize_all(&raws, &());
        assert_eq!(skipped, 0);
        assert_eq!(comments.len(), 3);

        let names: Vec<_> = comments
            .iter()
            .map(|n| n.comment.author.name.as_str())
            .collect();
        assert_eq!(names, vec!["Minh", "Minh", "Lan"]);
        let reply = &comments[2].comment;
        assert_eq!(reply.content, "second");
        assert_eq!(reply.parent_id, Some(root));
        assert!(comments.iter().all(|n| n.comment.created_at.is_some()));
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let me = viewer("u1", "Minh");
        let backend = MemoryBackend::new(me);

        let first = backend
            .create_comment(&new_comment("hello  world", None))
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.comment.is_some());

        let second = backend
            .create_comment(&new_comment("hello world", None))
            .await
            .unwrap();
        assert!(!second.success);
        assert!(second.is_duplicate());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let backend = MemoryBackend::new(viewer("u1", "Minh"));
        backend.fail_next(Op::Fetch);
        assert!(backend.fetch_comments("post-1").await.is_err());
        assert!(backend.fetch_comments("post-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_like_and_unlike() {
        let me = viewer("u1", "Minh");
        let backend = MemoryBackend::new(me.clone());
        let id = backend.seed("post-1", &viewer("u2", "Lan"), "hi", None);

        backend.like_comment(&id, &me.id).await.unwrap();
        backend.like_comment(&id, &me.id).await.unwrap();
        assert_eq!(backend.like_count(&id), Some(1));
        backend.unlike_comment(&id, &me.id).await.unwrap();
        assert_eq!(backend.like_count(&id), Some(0));
        assert!(backend
            .like_comment(&CommentId::from("missing"), &me.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_replies() {
        let me = viewer("u1", "Minh");
        let backend = MemoryBackend::new(me.clone());
        let root = backend.seed("post-1", &me, "root", None);
        backend.seed("post-1", &me, "reply", Some(&root));
        backend.seed("post-1", &me, "other", None);

        let ack = backend.delete_comment(&root).await.unwrap();
        assert!(ack.success);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_strip_author_leaves_no_identity() {
        let me = viewer("u1", "Minh");
        let backend = MemoryBackend::new(me.clone());
        for text in ["a", "b", "c"] {
            backend.seed("post-1", &me, text, None);
        }
        backend.set_knobs(Knobs {
            strip_author: true,
            ..Knobs::default()
        });

        let raws = backend.fetch_comments("post-1").await.unwrap();
        let (comments, _) = normalize_all(&raws, &());
        assert!(comments
            .iter()
            .all(|n| n.comment.author.name == domain::ANONYMOUS && n.identity.is_none()));
    }
}
