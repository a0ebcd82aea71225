use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use super::expiry::ExpiryPolicy;
use super::model::SessionRecord;
use crate::store::{LockManager, RecordStore, StoreError, StoreErrorKind, StoreOp, StoreResult};

const SESSIONS_VERSION: u32 = 1;
const SESSIONS_HEADER: &str = "Quiz Sessions";

/// 默认的会话记录标识
pub const DEFAULT_SESSIONS_RECORD: &str = "quiz-sessions.yaml";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry<S> {
    #[serde(flatten)]
    session: S,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PersistedSessions<S> {
    #[allow(dead_code)]
    version: u32,
    #[serde(default = "Vec::new")]
    sessions: Vec<PersistedEntry<S>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotEntry<'a, S> {
    #[serde(flatten)]
    session: &'a S,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct Snapshot<'a, S> {
    version: u32,
    sessions: Vec<SnapshotEntry<'a, S>>,
}

struct CacheState<S> {
    sessions: HashMap<String, S>,
    loaded: bool,
}

/// 会话缓存
///
/// 内存中的会话表在第一次访问时从持久化记录加载，每次修改都把完整的
/// 未过期会话集合写回记录。所有操作持有同一把异步锁直到写回完成，
/// 所以内存和磁盘在任何一次操作完成后都是一致的。
///
/// 过期的会话一律当作不存在处理。
pub struct SessionCache<S: SessionRecord> {
    store: RecordStore,
    locks: Arc<LockManager>,
    record_id: String,
    policy: ExpiryPolicy,
    state: AsyncMutex<CacheState<S>>,
}

impl<S: SessionRecord> SessionCache<S> {
    pub fn new(store: RecordStore, locks: Arc<LockManager>, record_id: impl Into<String>, policy: ExpiryPolicy) -> Self {
        SessionCache {
            store,
            locks,
            record_id: record_id.into(),
            policy,
            state: AsyncMutex::new(CacheState {
                sessions: HashMap::new(),
                loaded: false,
            }),
        }
    }

    pub fn policy(&self) -> ExpiryPolicy {
        self.policy
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// 从持久化记录加载会话，每个进程只加载一次
    pub async fn load(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await
    }

    /// 获取会话，已过期的会话会被移除并返回 `None`
    pub async fn get(&self, session_id: &str) -> StoreResult<Option<S>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let expired = match state.sessions.get(session_id) {
            Some(session) => self.policy.is_expired(session.started_at(), Utc::now()),
            None => return Ok(None),
        };

        if expired {
            if let Some(removed) = state.sessions.remove(session_id) {
                if let Err(err) = self.persist(&state).await {
                    state.sessions.insert(session_id.to_string(), removed);
                    return Err(err);
                }
            }
            debug!("会话 {} 已过期，移除", session_id);
            return Ok(None);
        }

        Ok(state.sessions.get(session_id).cloned())
    }

    /// 会话是否存在且未过期
    pub async fn has_session(&self, session_id: &str) -> StoreResult<bool> {
        Ok(self.get(session_id).await?.is_some())
    }

    /// 新建或覆盖会话并写回
    pub async fn save(&self, session: S) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let session_id = session.session_id().to_string();
        let previous = state.sessions.insert(session_id.clone(), session);

        if let Err(err) = self.persist(&state).await {
            // 写回失败时撤销内存中的修改
            match previous {
                Some(previous) => state.sessions.insert(session_id, previous),
                None => state.sessions.remove(&session_id),
            };
            return Err(err);
        }

        debug!("会话 {} 已保存", session_id);
        Ok(())
    }

    /// 删除会话并写回
    pub async fn remove(&self, session_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let removed = match state.sessions.remove(session_id) {
            Some(removed) => removed,
            None => return Ok(()),
        };

        if let Err(err) = self.persist(&state).await {
            state.sessions.insert(session_id.to_string(), removed);
            return Err(err);
        }

        debug!("会话 {} 已删除", session_id);
        Ok(())
    }

    /// 取出并删除会话，已过期或不存在时返回 `None`
    ///
    /// 同一个会话只会被一次调用取到。
    pub async fn take(&self, session_id: &str) -> StoreResult<Option<S>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let session = match state.sessions.remove(session_id) {
            Some(session) => session,
            None => return Ok(None),
        };

        if let Err(err) = self.persist(&state).await {
            state.sessions.insert(session_id.to_string(), session);
            return Err(err);
        }

        if self.policy.is_expired(session.started_at(), Utc::now()) {
            debug!("会话 {} 已过期，移除", session_id);
            return Ok(None);
        }
        Ok(Some(session))
    }

    /// 清理所有过期会话，返回清理数量
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.sweep_expired(&mut state).await
    }

    /// 清理过期会话后返回剩余的全部会话，按开始时间排序
    pub async fn list_all(&self) -> StoreResult<Vec<S>> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.sweep_expired(&mut state).await?;

        let mut sessions: Vec<S> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.session_id().cmp(b.session_id()))
        });
        Ok(sessions)
    }

    /// 删除全部会话，并写入空集合
    pub async fn clear_all(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.sessions.clear();
        state.loaded = false;
        self.persist(&state).await?;
        state.loaded = true;
        info!("已清空全部会话");
        Ok(())
    }

    /// 丢弃内存中的会话和加载标记，不修改持久化记录
    ///
    /// 下一次访问会重新从记录加载，用于模拟进程重启。
    pub async fn reset_loaded_state(&self) {
        let mut state = self.state.lock().await;
        state.sessions.clear();
        state.loaded = false;
    }

    async fn ensure_loaded(&self, state: &mut CacheState<S>) -> StoreResult<()> {
        if state.loaded {
            return Ok(());
        }

        let read = self
            .locks
            .with_lock(&self.record_id, || self.store.read(&self.record_id))
            .await;

        let document = match read {
            Ok(document) => document,
            Err(err) if err.is_not_found() => Value::Null,
            Err(err) if err.kind() == StoreErrorKind::ParseError => {
                warn!("会话记录 {} 无法解析，按空集合处理", self.record_id);
                Value::Null
            }
            // 其他错误保持未加载状态，避免后续写回覆盖磁盘上的会话
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let mut loaded = 0usize;
        let mut skipped = 0usize;
        if !document.is_null() {
            match serde_json::from_value::<PersistedSessions<S>>(document) {
                Ok(persisted) => {
                    for entry in persisted.sessions {
                        if self.policy.is_live(entry.expires_at, now) {
                            state
                                .sessions
                                .insert(entry.session.session_id().to_string(), entry.session);
                            loaded += 1;
                        } else {
                            skipped += 1;
                        }
                    }
                }
                Err(e) => warn!("会话记录 {} 结构无效，按空集合处理: {}", self.record_id, e),
            }
        }

        state.loaded = true;
        info!("从 {} 加载了 {} 个会话，跳过 {} 个过期会话", self.record_id, loaded, skipped);
        Ok(())
    }

    async fn sweep_expired(&self, state: &mut CacheState<S>) -> StoreResult<usize> {
        let now = Utc::now();
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, session)| self.policy.is_expired(session.started_at(), now))
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let removed: Vec<(String, S)> = expired
            .into_iter()
            .filter_map(|id| state.sessions.remove(&id).map(|session| (id, session)))
            .collect();

        if let Err(err) = self.persist(state).await {
            state.sessions.extend(removed);
            return Err(err);
        }
        info!("清理了 {} 个过期会话", removed.len());
        Ok(removed.len())
    }

    /// 把未过期的会话完整写回记录
    async fn persist(&self, state: &CacheState<S>) -> StoreResult<()> {
        let now = Utc::now();
        let mut sessions: Vec<SnapshotEntry<'_, S>> = state
            .sessions
            .values()
            .filter_map(|session| {
                let expires_at = self.policy.expires_at(session.started_at());
                self.policy
                    .is_live(expires_at, now)
                    .then_some(SnapshotEntry { session, expires_at })
            })
            .collect();
        sessions.sort_by(|a, b| a.session.session_id().cmp(b.session.session_id()));

        let snapshot = Snapshot {
            version: SESSIONS_VERSION,
            sessions,
        };
        let document =
            serde_json::to_value(&snapshot).map_err(|_| StoreError::parse(StoreOp::Write, &self.record_id))?;

        self.locks
            .with_lock(&self.record_id, || {
                self.store.write(&self.record_id, &document, Some(SESSIONS_HEADER))
            })
            .await
    }
}
