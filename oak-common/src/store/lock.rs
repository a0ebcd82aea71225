use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use log::trace;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type RecordMutex = Arc<AsyncMutex<()>>;

/// 按记录标识分配的互斥锁管理器
///
/// 每个标识第一次使用时创建一把异步互斥锁，之后在实例生命周期内一直保留
/// (除非调用 [`LockManager::prune_idle`])。多记录加锁总是按标识的字典序获取，
/// 任意数量、任意顺序的重叠请求都不会形成循环等待。
///
/// 对同一记录的所有修改都必须经过本管理器或 [`super::AtomicModifier`]。
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, RecordMutex>>,
}

/// 多记录锁的持有者，析构时按获取的相反顺序释放
struct MultiLockGuard {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for MultiLockGuard {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, id: &str) -> RecordMutex {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// 持有单个记录的锁执行操作
    ///
    /// 操作的返回值原样返回，不做任何转换。无论操作是正常结束、返回错误、
    /// panic 还是被取消，锁都会被释放。
    pub async fn with_lock<F, Fut, T>(&self, id: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mutex = self.mutex_for(id);
        let _guard = mutex.lock_owned().await;
        trace!("获得记录锁: {}", id);
        operation().await
    }

    /// 持有多个记录的锁执行操作
    ///
    /// 标识先排序去重，按排序后的顺序逐个获取，全部获得后才执行操作，
    /// 结束时按相反顺序释放。
    pub async fn with_multi_lock<I, S, F, Fut, T>(&self, ids: I, operation: F) -> T
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut sorted: Vec<String> = ids.into_iter().map(|id| id.as_ref().to_string()).collect();
        sorted.sort();
        sorted.dedup();

        let mut held = MultiLockGuard {
            guards: Vec::with_capacity(sorted.len()),
        };
        for id in &sorted {
            let mutex = self.mutex_for(id);
            held.guards.push(mutex.lock_owned().await);
        }
        trace!("获得多记录锁: {:?}", sorted);

        let output = operation().await;
        drop(held);
        output
    }

    /// 当前是否有人持有该记录的锁
    pub fn is_held(&self, id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(id)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// 已创建的互斥锁数量
    pub fn tracked_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 移除没有任何持有者或等待者的互斥锁，返回移除数量
    ///
    /// 持有者和等待者都在映射锁内克隆了 `Arc`，引用计数为 1 的互斥锁
    /// 只被映射本身引用，移除是安全的。
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = locks.len();
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - locks.len()
    }

    /// 丢弃所有互斥锁，仅用于测试
    ///
    /// 不能在仍有持有者时调用: 正在执行的操作继续持有旧锁，
    /// 新来的调用者会拿到一把新锁，两者之间不再互斥。
    pub fn clear(&self) {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
