pub mod config;
pub mod logger;
pub mod session;
pub mod store;
pub mod tools;

// 重新导出一些常用的类型，使其他crate更容易使用
pub use config::Settings;
pub use session::{ExpiryPolicy, QuizSession, SessionCache};
pub use store::{AtomicModifier, LockManager, ModifyOptions, RecordStore, StoreError};
pub use tools::{ToolHandler, ToolRequest};
