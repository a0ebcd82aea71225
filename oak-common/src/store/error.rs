use std::fmt;
use std::io;

use thiserror::Error;

/// 记录存储错误的粗粒度分类
///
/// 只暴露分类，不暴露底层文件系统错误的原始信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// 记录不存在
    NotFound,
    /// 权限不足
    PermissionDenied,
    /// 已存在
    AlreadyExists,
    /// 目标是一个目录
    IsContainer,
    /// 路径中的某一段不是目录
    NotAContainer,
    /// 内容无法解析
    ParseError,
    /// 其他失败
    GenericFailure,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StoreErrorKind::NotFound => "文件不存在",
            StoreErrorKind::PermissionDenied => "权限不足",
            StoreErrorKind::AlreadyExists => "已存在",
            StoreErrorKind::IsContainer => "是一个目录",
            StoreErrorKind::NotAContainer => "不是目录",
            StoreErrorKind::ParseError => "内容解析失败",
            StoreErrorKind::GenericFailure => "操作失败",
        };
        f.write_str(text)
    }
}

impl From<io::ErrorKind> for StoreErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::NotFound => StoreErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => StoreErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => StoreErrorKind::AlreadyExists,
            io::ErrorKind::IsADirectory => StoreErrorKind::IsContainer,
            io::ErrorKind::NotADirectory => StoreErrorKind::NotAContainer,
            io::ErrorKind::InvalidData => StoreErrorKind::ParseError,
            _ => StoreErrorKind::GenericFailure,
        }
    }
}

/// 出错时正在进行的存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Read,
    Write,
    CreateContainer,
    List,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Read => f.write_str("读取"),
            StoreOp::Write => f.write_str("写入"),
            StoreOp::CreateContainer => f.write_str("创建目录"),
            StoreOp::List => f.write_str("列出目录"),
        }
    }
}

/// 记录存储操作错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} {id} 失败: {kind}")]
pub struct StoreError {
    kind: StoreErrorKind,
    op: StoreOp,
    id: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, op: StoreOp, id: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            id: id.into(),
        }
    }

    /// 将IO错误归类，丢弃原始错误信息
    pub fn from_io(error: &io::Error, op: StoreOp, id: &str) -> Self {
        Self::new(error.kind().into(), op, id)
    }

    pub fn parse(op: StoreOp, id: &str) -> Self {
        Self::new(StoreErrorKind::ParseError, op, id)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn op(&self) -> StoreOp {
        self.op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}

/// 存储操作结果类型
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified_without_details() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "/secret/path/trainer.yaml: EACCES");
        let store_err = StoreError::from_io(&err, StoreOp::Write, "trainer.yaml");

        assert_eq!(store_err.kind(), StoreErrorKind::PermissionDenied);
        let message = store_err.to_string();
        assert_eq!(message, "写入 trainer.yaml 失败: 权限不足");
        assert!(!message.contains("/secret"));
    }

    #[test]
    fn unknown_io_kinds_become_generic_failure() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let store_err = StoreError::from_io(&err, StoreOp::Read, "a.yaml");
        assert_eq!(store_err.kind(), StoreErrorKind::GenericFailure);
        assert!(!store_err.is_not_found());
    }
}
