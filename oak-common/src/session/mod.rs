// 测验会话: 内存缓存 + 持久化记录 + 过期清理
mod cache;
mod expiry;
mod model;

pub use cache::{SessionCache, DEFAULT_SESSIONS_RECORD};
pub use expiry::ExpiryPolicy;
pub use model::{Challenge, QuizParameters, QuizSession, QuizType, SessionRecord};
