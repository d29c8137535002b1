//! 快照存储实现
//!
//! 定义快照存储trait与两个内置实现：原子替换的文件存储（单机与
//! 测试用）和进程内内存存储。生产部署可在此trait上接入共享KV。

use crate::error::PublishError;
use crate::state::StateSnapshot;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 快照存储trait
///
/// publish整体覆盖上一份快照；load返回最近一次成功发布的快照，
/// 从未发布过时返回None。
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 发布一份快照，覆盖之前的内容
    async fn publish(&self, snapshot: &StateSnapshot) -> Result<(), PublishError>;

    /// 读取最近发布的快照
    async fn load(&self) -> Result<Option<StateSnapshot>, PublishError>;
}

/// 基于文件的快照存储
///
/// 写入同目录临时文件后rename替换，读取方不会看到半写状态。
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// 创建文件存储
    ///
    /// # 参数
    /// * `path` - 快照文件路径
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// 快照文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn publish(&self, snapshot: &StateSnapshot) -> Result<(), PublishError> {
        let json = snapshot.to_json()?;

        let tmp_path = self.path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            // 避免残留临时文件
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(PublishError::Io(e));
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateSnapshot>, PublishError> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PublishError::Io(e)),
        };
        let snapshot = StateSnapshot::from_json(&json)?;
        Ok(Some(snapshot))
    }
}

/// 进程内内存存储，用于单进程部署与测试
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Option<StateSnapshot>>,
}

impl MemoryStore {
    /// 创建空的内存存储
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn publish(&self, snapshot: &StateSnapshot) -> Result<(), PublishError> {
        *self.inner.write().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<StateSnapshot>, PublishError> {
        Ok(self.inner.read().await.clone())
    }
}
