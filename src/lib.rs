use std::path::PathBuf;

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::core::{SyncConfig, SyncEngine, SyncSummary};
pub use error::{Result, SyncError};
pub use storage::{StorageConfig, StorageType};

/// 应用状态：数据目录和映射数据库
pub struct AppState {
    pub db: db::SqlitePool,
    pub data_dir: PathBuf,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let data_dir = data_dir()?;
        let db = db::open_pool(&data_dir.join("tracksync.db")).await?;
        Ok(Self { db, data_dir })
    }

    /// 清理资源（退出前调用）
    pub async fn cleanup(&self) {
        tracing::debug!("关闭数据库连接池...");
        self.db.close().await;
    }
}

/// 默认应用配置目录
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("tracksync"))
        .unwrap_or_else(|| PathBuf::from(".tracksync"))
}

/// 数据目录：默认配置目录，或其 config.json 中 `data_path` 指定的已存在目录
pub fn data_dir() -> Result<PathBuf> {
    let default_dir = default_data_dir();
    std::fs::create_dir_all(&default_dir)?;

    let config_file = default_dir.join("config.json");
    let dir = std::fs::read_to_string(&config_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|config| config.get("data_path")?.as_str().map(PathBuf::from))
        .filter(|p| p.exists() && p.is_dir())
        .inspect(|p| tracing::debug!("使用自定义数据路径: {:?}", p))
        .unwrap_or(default_dir);

    Ok(dir)
}

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }
}
