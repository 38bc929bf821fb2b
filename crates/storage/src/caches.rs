use anyhow::Context;
use domain::{CacheLookup, CachedIdentity, CommentId, LikeState, OverrideRecord};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::{models::CacheKey, PersistentStore};

/// Override store, identity cache and like cache, shared by every thread view.
///
/// Reads are served from memory. A write lands in memory and is flushed before it
/// returns; if the flush fails the memory change is undone.
pub struct Caches {
    store: Arc<dyn PersistentStore>,
    state: RwLock<CacheState>,
    // 落盘顺序与写入顺序一致
    write_gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct CacheState {
    overrides: HashMap<CommentId, OverrideRecord>,
    identities: HashMap<CommentId, CachedIdentity>,
    likes: HashMap<CommentId, LikeState>,
}

impl Caches {
    pub async fn open(store: Arc<dyn PersistentStore>) -> anyhow::Result<Self> {
        let entries = store
            .load_all()
            .await
            .context("Failed to load persisted caches")?;

        let mut state = CacheState::default();
        for (key, value) in entries {
            match CacheKey::parse(&key) {
                Some(CacheKey::Override(id)) => {
                    if let Some(record) = decode(&key, &value) {
                        state.overrides.insert(id, record);
                    }
                }
                Some(CacheKey::Identity(id)) => {
                    if let Some(identity) = decode(&key, &value) {
                        state.identities.insert(id, identity);
                    }
                }
                Some(CacheKey::Like(id)) => {
                    if let Some(like) = decode(&key, &value) {
                        state.likes.insert(id, like);
                    }
                }
                None => warn!("Ignoring unknown cache key {}", key),
            }
        }
        info!(
            overrides = state.overrides.len(),
            identities = state.identities.len(),
            likes = state.likes.len(),
            "Persisted caches loaded"
        );

        Ok(Self {
            store,
            state: RwLock::new(state),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Override store ---

    pub fn override_for(&self, id: &CommentId) -> Option<OverrideRecord> {
        self.read().overrides.get(id).cloned()
    }

    pub fn overrides(&self) -> HashMap<CommentId, OverrideRecord> {
        self.read().overrides.clone()
    }

    /// Merges `partial` into the override for `id` and returns the merged record.
    pub async fn set_override(
        &self,
        id: &CommentId,
        partial: &OverrideRecord,
    ) -> anyhow::Result<OverrideRecord> {
        let _gate = self.write_gate.lock().await;
        let (previous, merged) = {
            let mut state = self.write();
            let previous = state.overrides.get(id).cloned();
            let record = state.overrides.entry(id.clone()).or_default();
            record.merge(partial);
            (previous, record.clone())
        };
        if let Err(e) = self
            .flush(CacheKey::Override(id.clone()), Some(&merged))
            .await
        {
            put_back(&mut self.write().overrides, id, previous);
            return Err(e);
        }
        Ok(merged)
    }

    /// Replaces the whole override for `id`; `None` or an empty record removes it.
    pub async fn replace_override(
        &self,
        id: &CommentId,
        record: Option<OverrideRecord>,
    ) -> anyhow::Result<()> {
        let record = record.filter(|r| !r.is_empty());
        let _gate = self.write_gate.lock().await;
        let previous = {
            let mut state = self.write();
            match &record {
                Some(r) => state.overrides.insert(id.clone(), r.clone()),
                None => state.overrides.remove(id),
            }
        };
        if let Err(e) = self
            .flush(CacheKey::Override(id.clone()), record.as_ref())
            .await
        {
            put_back(&mut self.write().overrides, id, previous);
            return Err(e);
        }
        Ok(())
    }

    pub async fn clear_override(&self, id: &CommentId) -> anyhow::Result<()> {
        self.replace_override(id, None).await
    }

    // --- Identity cache ---

    /// Remembers the first identity resolved for `id`. Returns false if one was already known.
    pub async fn remember_identity(
        &self,
        id: &CommentId,
        identity: &CachedIdentity,
    ) -> anyhow::Result<bool> {
        let _gate = self.write_gate.lock().await;
        {
            let mut state = self.write();
            if state.identities.contains_key(id) {
                return Ok(false);
            }
            state.identities.insert(id.clone(), identity.clone());
        }
        if let Err(e) = self
            .flush(CacheKey::Identity(id.clone()), Some(identity))
            .await
        {
            self.write().identities.remove(id);
            return Err(e);
        }
        debug!("Remembered author {} for comment {}", identity.name, id);
        Ok(true)
    }

    // --- Like cache ---

    pub async fn record_like(&self, id: &CommentId, like: LikeState) -> anyhow::Result<()> {
        self.replace_like(id, Some(like)).await
    }

    pub async fn replace_like(
        &self,
        id: &CommentId,
        like: Option<LikeState>,
    ) -> anyhow::Result<()> {
        let _gate = self.write_gate.lock().await;
        let previous = {
            let mut state = self.write();
            if state.likes.get(id) == like.as_ref() {
                return Ok(());
            }
            match like {
                Some(l) => state.likes.insert(id.clone(), l),
                None => state.likes.remove(id),
            }
        };
        if let Err(e) = self.flush(CacheKey::Like(id.clone()), like.as_ref()).await {
            put_back(&mut self.write().likes, id, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn flush<T: Serialize>(&self, key: CacheKey, value: Option<&T>) -> anyhow::Result<()> {
        let key = key.to_string();
        match value {
            Some(v) => {
                let json = serde_json::to_string(v)?;
                self.store
                    .put(&key, &json)
                    .await
                    .with_context(|| format!("Failed to persist cache entry {}", key))
            }
            None => self
                .store
                .remove(&key)
                .await
                .with_context(|| format!("Failed to remove cache entry {}", key)),
        }
    }
}

impl CacheLookup for Caches {
    fn identity(&self, id: &CommentId) -> Option<CachedIdentity> {
        self.read().identities.get(id).cloned()
    }

    fn like_state(&self, id: &CommentId) -> Option<LikeState> {
        self.read().likes.get(id).copied()
    }
}

// 持久化失败时内存也回到写入前的样子
fn put_back<T>(map: &mut HashMap<CommentId, T>, id: &CommentId, previous: Option<T>) {
    match previous {
        Some(v) => map.insert(id.clone(), v),
        None => map.remove(id),
    };
}

fn decode<T: DeserializeOwned>(key: &str, value: &str) -> Option<T> {
    match serde_json::from_str(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Dropping unreadable cache entry {}: {}", key, e);
            None
        }
    }
}
