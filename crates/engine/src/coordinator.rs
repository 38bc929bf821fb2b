use adapter::{CommentBackend, NewComment};
use chrono::Utc;
use domain::protocol::{normalize, normalize_all, Normalized};
use domain::{
    assemble, match_pending, merge, CacheLookup, CachedIdentity, Comment, CommentId, LikeState,
    MergeInput, Mutation, MutationKind, OverrideRecord, PendingEntry, SyncEvent, Thread, Viewer,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use storage::Caches;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::pending::PendingBuffer;
use crate::settings::SyncSettings;

const EVENT_CAPACITY: usize = 64;

/// One thread view: its server snapshot, pending buffer and tombstones, plus the
/// mutation coordinator that drives them.
///
/// Cheap to clone; clones share the same view. Each mutation applies its optimistic
/// change synchronously, then awaits the backend and commits or rolls back.
#[derive(Clone)]
pub struct ThreadSync {
    inner: Arc<Inner>,
}

struct Inner {
    thread_id: String,
    viewer: Viewer,
    backend: Arc<dyn CommentBackend>,
    caches: Arc<Caches>,
    settings: SyncSettings,
    state: Mutex<ThreadState>,
    events: broadcast::Sender<SyncEvent>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct ThreadState {
    server: Vec<Comment>,
    pending: PendingBuffer,
    /// Deleted locally, still listed by the last fetch
    hidden: HashSet<CommentId>,
    /// Created locally and not yet listed, with the fetch count at commit time
    confirmed: HashMap<CommentId, u64>,
    fetches: u64,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ThreadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SyncEvent) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.events.send(event);
    }

    fn changed(&self) {
        self.emit(SyncEvent::ThreadChanged {
            thread_id: self.thread_id.clone(),
        });
    }

    fn failed(&self, kind: MutationKind, id: &CommentId, reason: &SyncError) {
        warn!("{} of {} failed, local change rolled back: {}", kind, id, reason);
        self.emit(SyncEvent::MutationFailed {
            kind,
            id: id.clone(),
            reason: reason.to_string(),
        });
        self.changed();
    }

    fn expire(&self, temp_id: &CommentId) {
        let removed = self.state().pending.remove(temp_id);
        if removed.is_some() {
            debug!("Pending comment {} expired without confirmation", temp_id);
            self.emit(SyncEvent::PendingExpired {
                temp_id: temp_id.clone(),
            });
            self.changed();
        }
    }

    // 缓存写失败只记日志，视图照常更新
    async fn absorb(&self, normalized: &Normalized) {
        let id = &normalized.comment.id;
        if let Some(identity) = &normalized.identity {
            if let Err(e) = self.caches.remember_identity(id, identity).await {
                error!("Failed to cache author of {}: {:#}", id, e);
            }
        }
        if let Some(like) = normalized.like_state {
            if let Err(e) = self.caches.record_like(id, like).await {
                error!("Failed to cache like state of {}: {:#}", id, e);
            }
        }
    }
}

fn spawn_expiry(
    inner: Weak<Inner>,
    temp_id: CommentId,
    timer: CancellationToken,
    after: std::time::Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                if let Some(inner) = inner.upgrade() {
                    inner.expire(&temp_id);
                }
            }
        }
    });
}

impl ThreadSync {
    pub fn new(
        thread_id: impl Into<String>,
        viewer: Viewer,
        backend: Arc<dyn CommentBackend>,
        caches: Arc<Caches>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                thread_id: thread_id.into(),
                viewer,
                backend,
                caches,
                settings,
                state: Mutex::new(ThreadState::default()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    pub fn viewer(&self) -> &Viewer {
        &self.inner.viewer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    // --- 读取视图 ---

    pub fn comments(&self) -> Vec<Comment> {
        let overrides = self.inner.caches.overrides();
        let state = self.inner.state();
        let pending = state.pending.entries();
        merge(&MergeInput {
            server: &state.server,
            pending: &pending,
            overrides: &overrides,
            hidden: &state.hidden,
            viewer: &self.inner.viewer,
            now: Utc::now(),
            dedup_skew: self.inner.settings.dedup_skew(),
        })
    }

    pub fn threads(&self) -> Vec<Thread> {
        assemble(self.comments())
    }

    pub fn pending(&self) -> Vec<PendingEntry> {
        self.inner.state().pending.entries()
    }

    pub fn is_liked(&self, id: &CommentId) -> bool {
        if let Some(liked) = self.inner.caches.override_for(id).and_then(|o| o.liked) {
            return liked;
        }
        if let Some(like) = self.inner.caches.like_state(id) {
            return like.liked;
        }
        self.inner
            .state()
            .server
            .iter()
            .find(|c| &c.id == id)
            .is_some_and(|c| c.liked)
    }

    // --- 服务端同步 ---

    /// Refetches the thread and folds it into local state.
    ///
    /// Pending entries the server now confirms graduate, tombstones of comments the
    /// server no longer lists are dropped, and override fields the server caught up
    /// with are cleared. A comment created after this fetch was sent is kept even
    /// though the response cannot list it yet.
    pub async fn refresh(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let generation = {
            let mut state = inner.state();
            state.fetches += 1;
            state.fetches
        };
        let raws = inner
            .backend
            .fetch_comments(&inner.thread_id)
            .await
            .map_err(SyncError::Backend)?;

        let (normalized, skipped) = normalize_all(&raws, inner.caches.as_ref());
        if skipped > 0 {
            warn!(
                "Skipped {} comment payload(s) without an id in thread {}",
                skipped, inner.thread_id
            );
        }
        let mut comments = Vec::with_capacity(normalized.len());
        for n in normalized {
            inner.absorb(&n).await;
            comments.push(n.comment);
        }

        let overrides = inner.caches.overrides();
        for c in &comments {
            let Some(record) = overrides.get(&c.id) else {
                continue;
            };
            let rest = record.settled_by(c);
            // 期间又有本地写入的话保留新值
            if &rest != record && inner.caches.override_for(&c.id).as_ref() == Some(record) {
                debug!("Server caught up with local override of {}", c.id);
                if let Err(e) = inner.caches.replace_override(&c.id, Some(rest)).await {
                    error!("Failed to prune override of {}: {:#}", c.id, e);
                }
            }
        }

        let graduated = {
            let mut state = inner.state();
            let carried: Vec<Comment> = {
                let listed: HashSet<&CommentId> = comments.iter().map(|c| &c.id).collect();
                state.hidden.retain(|id| listed.contains(id));
                // 请求发出后才确认的评论，这次响应里还没有
                state
                    .confirmed
                    .retain(|id, at| !listed.contains(id) && *at >= generation);
                state
                    .server
                    .iter()
                    .filter(|c| state.confirmed.contains_key(&c.id))
                    .cloned()
                    .collect()
            };
            if !carried.is_empty() {
                debug!(
                    "Keeping {} comment(s) confirmed after fetch #{} was sent",
                    carried.len(),
                    generation
                );
            }
            let (roots, replies): (Vec<Comment>, Vec<Comment>) =
                carried.into_iter().partition(|c| c.is_top_level());
            comments.splice(0..0, roots);
            comments.extend(replies);
            let matched = match_pending(
                &state.pending.entries(),
                &comments,
                &inner.viewer,
                inner.settings.dedup_skew(),
            );
            let graduated = state.pending.graduate(&matched);
            state.server = comments;
            graduated
        };
        for entry in &graduated {
            debug!("Pending comment {} confirmed by server", entry.temp_id);
        }
        info!(
            thread = %inner.thread_id,
            graduated = graduated.len(),
            "Thread refreshed"
        );
        inner.changed();
        Ok(())
    }

    // --- 变更操作 ---

    pub async fn apply(&self, mutation: Mutation) -> SyncResult<()> {
        match mutation {
            Mutation::Create { content, parent_id } => {
                self.create(&content, parent_id).await.map(|_| ())
            }
            Mutation::Edit { id, content } => self.edit(&id, &content).await,
            Mutation::Delete { id } => self.delete(&id).await,
            Mutation::ToggleLike { id } => self.toggle_like(&id).await.map(|_| ()),
        }
    }

    /// Posts a comment or reply.
    ///
    /// Returns the server id when the response carries the entity, otherwise the temp id
    /// of the entry left pending for the next fetch to confirm.
    pub async fn create(
        &self,
        content: &str,
        parent_id: Option<CommentId>,
    ) -> SyncResult<CommentId> {
        let inner = &self.inner;
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyContent);
        }

        let now = Utc::now();
        let temp_id = CommentId::temp(now);
        let timer = inner.shutdown.child_token();
        {
            let mut state = inner.state();
            if state
                .pending
                .find_duplicate(content, parent_id.as_ref())
                .is_some()
            {
                return Err(SyncError::AlreadySubmitting);
            }
            state.pending.push(
                PendingEntry {
                    temp_id: temp_id.clone(),
                    content: content.to_string(),
                    parent_id: parent_id.clone(),
                    created_at_local: now,
                    expires_at: now + inner.settings.pending_expiry(),
                },
                timer.clone(),
            );
        }
        spawn_expiry(
            Arc::downgrade(inner),
            temp_id.clone(),
            timer,
            inner.settings.pending_expiry,
        );
        debug!("Pending comment {} added to thread {}", temp_id, inner.thread_id);
        inner.changed();

        let request = NewComment {
            thread_id: inner.thread_id.clone(),
            content: content.to_string(),
            parent_id,
        };
        let reply = match inner.backend.create_comment(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                let err = SyncError::Backend(e);
                self.create_failed(&temp_id, &err);
                return Err(err);
            }
        };

        if !reply.success {
            let message = reply
                .message
                .clone()
                .unwrap_or_else(|| "comment was not accepted".to_string());
            let err = if reply.is_duplicate() {
                SyncError::Duplicate(message)
            } else {
                SyncError::Rejected(message)
            };
            self.create_failed(&temp_id, &err);
            return Err(err);
        }

        let entity = reply
            .comment
            .as_ref()
            .and_then(|raw| normalize(raw, inner.caches.as_ref()));
        match entity {
            Some(mut n) => {
                if n.comment.author.id.is_none() {
                    // 响应里没有作者信息，那就是自己
                    n.comment.author = inner.viewer.identity();
                    n.identity = Some(CachedIdentity {
                        name: inner.viewer.name.clone(),
                        handle: inner.viewer.handle.clone(),
                    });
                }
                inner.absorb(&n).await;
                let comment = n.comment;
                let id = comment.id.clone();
                {
                    let mut state = inner.state();
                    state.pending.remove(&temp_id);
                    let fetches = state.fetches;
                    state.confirmed.insert(id.clone(), fetches);
                    if !state.server.iter().any(|c| c.id == id) {
                        if comment.is_top_level() {
                            state.server.insert(0, comment);
                        } else {
                            state.server.push(comment);
                        }
                    }
                }
                info!("Comment {} confirmed as {}", temp_id, id);
                inner.changed();
                Ok(id)
            }
            None => {
                inner.state().pending.touch(&temp_id, Utc::now());
                debug!("Create of {} acknowledged without entity, refetching", temp_id);
                inner.changed();
                if let Err(e) = self.refresh().await {
                    warn!("Refetch after soft confirm failed: {}", e);
                }
                Ok(temp_id)
            }
        }
    }

    // 已经超时移除的条目不再报错，超时本身是静默的
    fn create_failed(&self, temp_id: &CommentId, err: &SyncError) {
        let inner = &self.inner;
        if inner.state().pending.remove(temp_id).is_none() {
            debug!("Create of expired {} ended with {}", temp_id, err);
            return;
        }
        if let SyncError::Duplicate(message) = err {
            warn!("Server reported duplicate submission of {}", temp_id);
            inner.emit(SyncEvent::Warning {
                message: message.clone(),
            });
        }
        inner.failed(MutationKind::Create, temp_id, err);
    }

    pub async fn edit(&self, id: &CommentId, content: &str) -> SyncResult<()> {
        let inner = &self.inner;
        if id.is_temp() {
            return Err(SyncError::NotConfirmed(id.clone()));
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyContent);
        }
        if !self.is_visible(id) {
            return Err(SyncError::NotFound(id.clone()));
        }

        let previous = inner.caches.override_for(id);
        let written = inner
            .caches
            .set_override(id, &OverrideRecord::edit(content, Utc::now()))
            .await
            .map_err(SyncError::Storage)?;
        inner.changed();

        match inner.backend.update_comment(id, content).await {
            Ok(reply) => {
                debug!("Edit of {} accepted, server updated at {:?}", id, reply.updated_at);
                Ok(())
            }
            Err(e) => {
                if let Some(mut current) = inner.caches.override_for(id) {
                    if current.content == written.content
                        && current.timestamp_ticks == written.timestamp_ticks
                    {
                        let before = previous.unwrap_or_default();
                        current.content = before.content;
                        current.timestamp_ticks = before.timestamp_ticks;
                        if let Err(e) = inner.caches.replace_override(id, Some(current)).await {
                            error!("Failed to restore override of {}: {:#}", id, e);
                        }
                    }
                }
                let err = SyncError::Backend(e);
                inner.failed(MutationKind::Edit, id, &err);
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: &CommentId) -> SyncResult<()> {
        let inner = &self.inner;
        if id.is_temp() {
            // 还没发到服务端，直接从缓冲区拿掉
            let removed = inner.state().pending.remove(id);
            return match removed {
                Some(_) => {
                    debug!("Pending comment {} discarded", id);
                    inner.changed();
                    Ok(())
                }
                None => Err(SyncError::NotFound(id.clone())),
            };
        }

        let (index, removed) = {
            let mut state = inner.state();
            if state.hidden.contains(id) {
                return Err(SyncError::NotFound(id.clone()));
            }
            let Some(index) = state.server.iter().position(|c| &c.id == id) else {
                return Err(SyncError::NotFound(id.clone()));
            };
            let removed = state.server.remove(index);
            state.hidden.insert(id.clone());
            (index, removed)
        };
        inner.changed();

        let outcome = match inner.backend.delete_comment(id).await {
            Ok(ack) if ack.success => Ok(()),
            Ok(_) => Err(SyncError::Rejected(format!("delete of {} was refused", id))),
            Err(e) => Err(SyncError::Backend(e)),
        };
        match outcome {
            Ok(()) => {
                inner.state().confirmed.remove(id);
                if let Err(e) = inner.caches.clear_override(id).await {
                    error!("Failed to drop override of deleted {}: {:#}", id, e);
                }
                info!("Comment {} deleted", id);
                Ok(())
            }
            Err(err) => {
                {
                    let mut state = inner.state();
                    if state.hidden.remove(id) && !state.server.iter().any(|c| &c.id == id) {
                        let at = index.min(state.server.len());
                        state.server.insert(at, removed);
                    }
                }
                inner.failed(MutationKind::Delete, id, &err);
                Err(err)
            }
        }
    }

    pub async fn toggle_like(&self, id: &CommentId) -> SyncResult<LikeState> {
        let inner = &self.inner;
        if id.is_temp() {
            return Err(SyncError::NotConfirmed(id.clone()));
        }
        let current = {
            let state = inner.state();
            let comment = state
                .server
                .iter()
                .find(|c| &c.id == id && !state.hidden.contains(id))
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            let record = inner.caches.override_for(id).unwrap_or_default();
            LikeState {
                liked: record.liked.unwrap_or(comment.liked),
                like_count: record.like_count.unwrap_or(comment.like_count),
            }
        };
        let next = if current.liked {
            LikeState {
                liked: false,
                like_count: current.like_count.saturating_sub(1),
            }
        } else {
            LikeState {
                liked: true,
                like_count: current.like_count.saturating_add(1),
            }
        };

        let previous_override = inner.caches.override_for(id);
        let previous_like = inner.caches.like_state(id);
        let written = inner
            .caches
            .set_override(id, &OverrideRecord::like(next.liked, next.like_count))
            .await
            .map_err(SyncError::Storage)?;
        if let Err(e) = inner.caches.record_like(id, next).await {
            self.restore_like_override(id, &written, previous_override).await;
            return Err(SyncError::Storage(e));
        }
        inner.changed();

        let user_id = inner.viewer.id.as_str();
        let call = if next.liked {
            inner.backend.like_comment(id, user_id).await
        } else {
            inner.backend.unlike_comment(id, user_id).await
        };
        let err = match call {
            Ok(ack) if ack.success => return Ok(next),
            Ok(_) => SyncError::Rejected(format!("like change on {} was refused", id)),
            Err(e) => SyncError::Backend(e),
        };

        self.restore_like_override(id, &written, previous_override)
            .await;
        if inner.caches.like_state(id) == Some(next) {
            if let Err(e) = inner.caches.replace_like(id, previous_like).await {
                error!("Failed to restore like state of {}: {:#}", id, e);
            }
        }
        inner.failed(MutationKind::Like, id, &err);
        Err(err)
    }

    // 只回滚本次写入的点赞字段，之后的本地操作不受影响
    async fn restore_like_override(
        &self,
        id: &CommentId,
        written: &OverrideRecord,
        previous: Option<OverrideRecord>,
    ) {
        let Some(mut current) = self.inner.caches.override_for(id) else {
            return;
        };
        if current.liked != written.liked || current.like_count != written.like_count {
            return;
        }
        let before = previous.unwrap_or_default();
        current.liked = before.liked;
        current.like_count = before.like_count;
        if let Err(e) = self.inner.caches.replace_override(id, Some(current)).await {
            error!("Failed to restore override of {}: {:#}", id, e);
        }
    }

    fn is_visible(&self, id: &CommentId) -> bool {
        let state = self.inner.state();
        !state.hidden.contains(id) && state.server.iter().any(|c| &c.id == id)
    }

    /// Tears the view down: cancels every expiry timer. In-flight requests finish on their own.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.state().pending.clear();
        info!("Thread view {} closed", self.inner.thread_id);
    }
}
