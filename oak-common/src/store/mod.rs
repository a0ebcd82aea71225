// 记录存储层: 文件读写、按记录加锁、原子读改写
mod atomic;
mod codec;
mod error;
mod lock;
mod record_store;

pub use atomic::{AtomicModifier, ModifyOptions};
pub use codec::{CodecError, Document, DocumentCodec, JsonCodec};
pub use error::{StoreError, StoreErrorKind, StoreOp, StoreResult};
pub use lock::LockManager;
pub use record_store::{DataRoot, RecordStore};
