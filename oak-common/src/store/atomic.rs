use std::future::Future;
use std::sync::Arc;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::codec::Document;
use super::error::{StoreError, StoreOp};
use super::lock::LockManager;
use super::record_store::RecordStore;

/// 读改写事务的选项
#[derive(Debug, Clone)]
pub struct ModifyOptions<D = Document> {
    default_value: Option<D>,
    header: Option<String>,
}

impl<D> Default for ModifyOptions<D> {
    fn default() -> Self {
        ModifyOptions {
            default_value: None,
            header: None,
        }
    }
}

impl<D> ModifyOptions<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录不存在时使用的初始内容
    pub fn with_default(mut self, value: D) -> Self {
        self.default_value = Some(value);
        self
    }

    /// 写入时附加的说明注释
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }
}

/// 原子读改写
///
/// 读取、转换和写回都在该记录的锁内完成，期间其他事务既看不到中间状态，
/// 也无法交错写入。需要"先读后写"语义的调用方都应该走这里。
#[derive(Debug, Clone)]
pub struct AtomicModifier {
    store: RecordStore,
    locks: Arc<LockManager>,
}

impl AtomicModifier {
    pub fn new(store: RecordStore, locks: Arc<LockManager>) -> Self {
        AtomicModifier { store, locks }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// 在记录锁内执行 读取 → 转换 → 写回，返回写入的文档
    ///
    /// 记录不存在时，如果提供了默认值则以默认值为起点，否则返回 `NotFound`。
    /// 其他读取错误直接返回。转换返回错误时不写入任何内容。
    pub async fn modify<F, Fut, E>(&self, id: &str, options: ModifyOptions, transform: F) -> Result<Document, E>
    where
        F: FnOnce(Document) -> Fut,
        Fut: Future<Output = Result<Document, E>>,
        E: From<StoreError>,
    {
        let ModifyOptions { default_value, header } = options;

        self.locks
            .with_lock(id, || async move {
                let current = match self.store.read(id).await {
                    Ok(document) => document,
                    Err(err) if err.is_not_found() => match default_value {
                        Some(default) => {
                            debug!("记录 {} 不存在，使用默认值", id);
                            default
                        }
                        None => return Err(err.into()),
                    },
                    Err(err) => return Err(err.into()),
                };

                let updated = transform(current).await?;
                self.store.write(id, &updated, header.as_deref()).await?;
                Ok(updated)
            })
            .await
    }

    /// 类型化的 [`AtomicModifier::modify`]
    pub async fn modify_as<T, F, Fut, E>(&self, id: &str, options: ModifyOptions<T>, transform: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError>,
    {
        let ModifyOptions { default_value, header } = options;
        let default_value = match default_value {
            Some(value) => Some(serde_json::to_value(&value).map_err(|_| StoreError::parse(StoreOp::Write, id))?),
            None => None,
        };
        let options = ModifyOptions { default_value, header };

        let document = self
            .modify::<_, _, E>(id, options, |current| async move {
                let typed: T = serde_json::from_value(current).map_err(|_| StoreError::parse(StoreOp::Read, id))?;
                let updated = transform(typed).await?;
                let document =
                    serde_json::to_value(&updated).map_err(|_| StoreError::parse(StoreOp::Write, id))?;
                Ok(document)
            })
            .await?;

        serde_json::from_value(document).map_err(|_| E::from(StoreError::parse(StoreOp::Read, id)))
    }
}
