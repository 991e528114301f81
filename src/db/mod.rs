//! SQLite 连接与迁移

use crate::error::{Result, SyncError};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::time::Duration;

pub use sqlx::SqlitePool;

/// 打开（必要时创建）数据库文件并运行迁移
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    // SQLite 连接字符串格式: sqlite:path
    // Windows 路径需要转换反斜杠为正斜杠
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| SyncError::Config(format!("Invalid database path: {}", db_path.display())))?
        .replace('\\', "/");

    let pool = SqlitePoolOptions::new()
        .max_connections(5) // SQLite 单文件，不需要太多连接
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&format!("sqlite:{}?mode=rwc", db_path_str))
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// 内存数据库，只保留一个永不回收的连接，否则数据会随连接一起消失
pub async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
