use chrono::{DateTime, Duration, Utc};

/// 会话过期策略
///
/// 保存时计算的 `expiresAt` 和访问时的年龄检查共用同一个时间窗口。
/// 年龄严格大于窗口才算过期，因此 `now <= expiresAt` 与"未过期"等价。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    window: Duration,
}

impl ExpiryPolicy {
    /// 默认窗口: 1小时
    pub const DEFAULT_WINDOW_SECS: u64 = 3600;

    // 100年，避免时间戳相加溢出
    const MAX_WINDOW_SECS: u64 = 100 * 365 * 24 * 3600;

    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_secs(seconds: u64) -> Self {
        Self::new(Duration::seconds(seconds.min(Self::MAX_WINDOW_SECS) as i64))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 根据开始时间计算过期时间
    pub fn expires_at(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        started_at + self.window
    }

    /// 会话年龄是否已超过窗口
    pub fn is_expired(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - started_at > self.window
    }

    /// 按已保存的过期时间判断会话是否仍有效
    pub fn is_live(&self, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now <= expires_at
    }

    /// 剩余有效时间，已过期时为零
    pub fn remaining(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let remaining = self.expires_at(started_at) - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::from_secs(Self::DEFAULT_WINDOW_SECS)
    }
}
