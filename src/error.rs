//! 会中止整个同步过程的错误
//!
//! 单个文件的失败不在这里，它们作为 `FileFailure` 记录在同步报告中。

use crate::storage::Side;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 任一侧扫描失败，不完整的文件树会导致误删，所以整次同步放弃
    #[error("failed to enumerate {side} files: {cause:#}")]
    Enumeration { side: Side, cause: anyhow::Error },

    #[error("mapping store error: {0}")]
    MappingStore(#[from] sqlx::Error),

    #[error("mapping store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt mapping for {path}: {reason}")]
    CorruptMapping { path: String, reason: String },

    #[error("a sync pass is already running")]
    AlreadyRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
