use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use super::codec::{Document, DocumentCodec, JsonCodec};
use super::error::{StoreError, StoreOp, StoreResult};

/// 数据根目录
///
/// 每次读写都会重新解析，测试可以在两次调用之间切换目录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRoot {
    /// 固定目录
    Fixed(PathBuf),
    /// 从环境变量读取，未设置或为空时使用后备目录
    Env { var: String, fallback: PathBuf },
}

impl DataRoot {
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        DataRoot::Fixed(path.into())
    }

    pub fn env(var: impl Into<String>, fallback: impl Into<PathBuf>) -> Self {
        DataRoot::Env {
            var: var.into(),
            fallback: fallback.into(),
        }
    }

    /// 解析出当前的根目录
    pub fn resolve(&self) -> PathBuf {
        match self {
            DataRoot::Fixed(path) => path.clone(),
            DataRoot::Env { var, fallback } => std::env::var_os(var)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| fallback.clone()),
        }
    }
}

/// 基于文件的记录存储
///
/// 记录由相对路径标识。所有失败都以 [`StoreError`] 返回，
/// 不会携带底层文件系统的原始错误信息。
/// 本层不做并发控制，读改写必须通过 [`super::AtomicModifier`]。
#[derive(Clone)]
pub struct RecordStore {
    root: DataRoot,
    codec: Arc<dyn DocumentCodec>,
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore").field("root", &self.root).finish()
    }
}

impl RecordStore {
    pub fn new(root: DataRoot) -> Self {
        Self::with_codec(root, Arc::new(JsonCodec))
    }

    pub fn with_codec(root: DataRoot, codec: Arc<dyn DocumentCodec>) -> Self {
        RecordStore { root, codec }
    }

    pub fn root(&self) -> &DataRoot {
        &self.root
    }

    /// 记录标识对应的完整路径
    pub fn resolve(&self, id: &str) -> PathBuf {
        self.root.resolve().join(id.trim_start_matches('/'))
    }

    /// 读取并解析记录，空文件得到 `Null`
    pub async fn read(&self, id: &str) -> StoreResult<Document> {
        let path = self.resolve(id);
        let content = fs::read_to_string(&path).await.map_err(|e| {
            debug!("读取记录 {} 失败: {}", id, e);
            StoreError::from_io(&e, StoreOp::Read, id)
        })?;

        self.codec
            .decode(&content)
            .map_err(|_| StoreError::parse(StoreOp::Read, id))
    }

    /// 读取记录并解码为指定类型
    pub async fn read_as<T: DeserializeOwned>(&self, id: &str) -> StoreResult<T> {
        let document = self.read(id).await?;
        serde_json::from_value(document).map_err(|e| {
            debug!("记录 {} 结构不匹配: {}", id, e);
            StoreError::parse(StoreOp::Read, id)
        })
    }

    /// 写入记录，必要时创建父目录
    ///
    /// 先写入同目录下的临时文件再重命名，读者不会看到写了一半的内容。
    pub async fn write(&self, id: &str, document: &Document, header: Option<&str>) -> StoreResult<()> {
        let content = self
            .codec
            .encode(document, header)
            .map_err(|_| StoreError::parse(StoreOp::Write, id))?;
        self.write_text(id, &content).await
    }

    /// 原样写入文本文件，不经过编码，写入方式与 [`Self::write`] 相同
    pub async fn write_text(&self, id: &str, content: &str) -> StoreResult<()> {
        let path = self.resolve(id);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                debug!("为记录 {} 创建目录失败: {}", id, e);
                StoreError::from_io(&e, StoreOp::Write, id)
            })?;
        }

        let temp_path = temp_path_for(&path);
        let written = match fs::write(&temp_path, content).await {
            Ok(()) => fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            debug!("写入记录 {} 失败: {}", id, e);
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::from_io(&e, StoreOp::Write, id));
        }

        debug!("记录 {} 已写入", id);
        Ok(())
    }

    /// 将任意可序列化的值写入记录
    pub async fn write_as<T: Serialize>(&self, id: &str, value: &T, header: Option<&str>) -> StoreResult<()> {
        let document = serde_json::to_value(value).map_err(|_| StoreError::parse(StoreOp::Write, id))?;
        self.write(id, &document, header).await
    }

    /// 检查记录或目录是否存在
    pub async fn exists(&self, id: &str) -> bool {
        fs::metadata(self.resolve(id)).await.is_ok()
    }

    /// 列出目录下的子目录名，忽略隐藏目录，按名称排序
    pub async fn list_containers(&self, id: &str) -> StoreResult<Vec<String>> {
        let map_err = |e: std::io::Error| {
            debug!("列出目录 {} 失败: {}", id, e);
            StoreError::from_io(&e, StoreOp::List, id)
        };

        let mut entries = fs::read_dir(self.resolve(id)).await.map_err(map_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await.map_err(map_err)?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// 创建目录，已存在时视为成功
    pub async fn create_container(&self, id: &str) -> StoreResult<()> {
        fs::create_dir_all(self.resolve(id)).await.map_err(|e| {
            debug!("创建目录 {} 失败: {}", id, e);
            StoreError::from_io(&e, StoreOp::CreateContainer, id)
        })
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}
