//! 应用配置模块
//!
//! 所有配置保存在数据目录下的 `config.json` 中，每个模块占一个顶层键：
//! `sync`、`remote`、`log`。

use crate::core::scanner::{default_exclude_patterns, ScanConfig};
use crate::core::SyncConfig;
use crate::error::{Result, SyncError};
use crate::storage::StorageConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 远程同步目录的默认名称
pub const DEFAULT_REMOTE_FOLDER: &str = "Breadcrumbs";

/// 读取 config.json 中的一个顶层键，文件或键不存在时返回 None
pub(crate) fn read_section(config_dir: &Path, key: &str) -> Option<serde_json::Value> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    let mut config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    config.get_mut(key).map(serde_json::Value::take)
}

/// 更新 config.json 中的一个顶层键，保留其它键
pub(crate) fn write_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    let config_file = config_dir.join("config.json");

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };

    config[key] = serde_json::to_value(value)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}

fn parse_section<T: DeserializeOwned>(key: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SyncError::Config(format!("invalid `{}` section: {}", key, e)))
}

/// 同步配置（`sync` 键）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 本地轨迹目录，未设置时使用数据目录下的 `tracks`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,
    /// 远程存储中存放文件的目录
    #[serde(default = "default_remote_folder")]
    pub remote_folder: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// 仅同步这些扩展名（空表示全部）
    #[serde(default)]
    pub include_extensions: Vec<String>,
}

fn default_remote_folder() -> String {
    DEFAULT_REMOTE_FOLDER.to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            local_root: None,
            remote_folder: default_remote_folder(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            exclude_patterns: default_exclude_patterns(),
            include_extensions: vec![],
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载，缺失时使用默认值
    pub fn load(config_dir: &Path) -> Result<Self> {
        match read_section(config_dir, "sync") {
            Some(value) => parse_section("sync", value),
            None => Ok(Self::default()),
        }
    }

    /// 保存同步配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        write_section(config_dir, "sync", self)
    }

    pub fn local_root_in(&self, data_dir: &Path) -> PathBuf {
        self.local_root
            .clone()
            .unwrap_or_else(|| data_dir.join("tracks"))
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        SyncConfig {
            max_retries: settings.max_retries,
            retry_base_delay_ms: settings.retry_base_delay_ms,
            scan_config: ScanConfig {
                exclude_patterns: settings.exclude_patterns.clone(),
                include_extensions: settings.include_extensions.clone(),
            },
        }
    }
}

/// 读取远程存储配置（`remote` 键），没有配置时报错
pub fn load_remote(config_dir: &Path) -> Result<StorageConfig> {
    let value = read_section(config_dir, "remote").ok_or_else(|| {
        SyncError::Config(format!(
            "no `remote` section in {}",
            config_dir.join("config.json").display()
        ))
    })?;
    parse_section("remote", value)
}

/// 保存远程存储配置
pub fn save_remote(config_dir: &Path, remote: &StorageConfig) -> io::Result<()> {
    write_section(config_dir, "remote", remote)
}
