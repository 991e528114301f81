pub mod local;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use local::LocalStorage;
pub use remote::OpendalRemote;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete, rename 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 同步的一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => write!(f, "local"),
            Side::Remote => write!(f, "remote"),
        }
    }
}

/// 一次扫描中在某一侧观察到的文件
///
/// `path` 相对于该侧根目录，统一使用 `/` 分隔，比较时不区分大小写。
/// 每次扫描重新生成，不会持久化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub side: Side,
    pub modified_time: DateTime<Utc>,
    /// 仅远程记录有
    pub remote_id: Option<String>,
}

impl FileRecord {
    pub fn local(path: impl Into<String>, modified_time: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            side: Side::Local,
            modified_time,
            remote_id: None,
        }
    }

    pub fn remote(
        path: impl Into<String>,
        modified_time: DateTime<Utc>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            side: Side::Remote,
            modified_time,
            remote_id: Some(remote_id.into()),
        }
    }

    /// 文件名（路径最后一段）
    pub fn file_name(&self) -> &str {
        file_name(&self.path)
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.side, self.path)
    }
}

/// 取路径最后一段
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// 取路径中的目录部分（不含文件名）
pub fn parent_segments(path: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    parts.pop();
    parts
}

/// 远程条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// 远程目录下的一个子条目
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    pub modified_time: DateTime<Utc>,
}

/// 本地存储接口，路径均相对于根目录
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 递归列出所有文件（不含目录），任何错误都会中止整个扫描
    async fn enumerate(&self) -> Result<Vec<FileRecord>>;

    async fn read(&self, path: &str) -> Result<Bytes>;

    /// 写入文件，自动创建父目录；`overwrite` 为 false 且文件已存在时失败
    async fn write(&self, path: &str, data: Bytes, overwrite: bool) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// 同目录内重命名，返回新的相对路径；目标已存在时失败
    async fn rename(&self, path: &str, new_name: &str) -> Result<String>;

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 远程存储接口，文件和目录都通过 id 访问
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// 列出目录的直接子条目
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteEntry>>;

    /// 上传（覆盖）文件，返回上传后服务端报告的元数据
    async fn upload(&self, folder_id: &str, name: &str, data: Bytes) -> Result<RemoteEntry>;

    async fn download(&self, id: &str) -> Result<Bytes>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteEntry>;

    /// 获取同步根目录下指定路径的目录 id，缺失的层级会被创建。
    /// 空切片返回根目录本身。
    async fn ensure_folder(&self, segments: &[&str]) -> Result<String>;

    fn name(&self) -> &str;
}

/// 远程存储类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Fs,
    S3,
    WebDav,
}

/// 远程存储配置（config.json 中的 `remote` 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// 根据配置创建远程存储，同步到其中的 `folder` 目录
pub fn create_remote(config: &StorageConfig, folder: &str) -> Result<Arc<dyn RemoteStore>> {
    let required = |value: &Option<String>, what: &str| {
        value
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{:?} storage requires {}", config.typ, what))
    };

    let remote = match config.typ {
        StorageType::Fs => {
            let path = required(&config.path, "path")?;
            tracing::info!("初始化目录远程存储: {}", path);
            OpendalRemote::fs(&path, folder)?
        }
        StorageType::WebDav => {
            let endpoint = required(&config.endpoint, "endpoint")?;
            let username = required(&config.username, "username")?;
            let password = required(&config.password, "password")?;
            tracing::info!("创建WebDAV存储: endpoint={}, root={:?}", endpoint, config.root);
            OpendalRemote::webdav(&endpoint, &username, &password, config.root.clone(), folder)?
        }
        StorageType::S3 => {
            let bucket = required(&config.bucket, "bucket")?;
            let region = required(&config.region, "region")?;
            let access_key = required(&config.access_key, "accessKey")?;
            let secret_key = required(&config.secret_key, "secretKey")?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            OpendalRemote::s3(
                &bucket,
                &region,
                &access_key,
                &secret_key,
                config.endpoint.clone(),
                config.root.clone(),
                folder,
            )?
        }
    };

    Ok(Arc::new(remote))
}
