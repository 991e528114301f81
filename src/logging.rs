//! 日志模块 - 提供文件日志和大小管理功能

use crate::config::{read_section, write_section};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志文件名
pub const LOG_FILE_NAME: &str = "tracksync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置文件加载日志配置，无效时使用默认值
    pub fn load(config_dir: &Path) -> Self {
        read_section(config_dir, "log")
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    /// 保存日志配置
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        write_section(config_dir, "log", self)
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器，超过限制后当前文件改名为 `.old`
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        Self::with_limit(file_path, max_size)
    }

    fn with_limit(file_path: PathBuf, max_size: u64) -> io::Result<Self> {
        // 检查现有文件大小，如果超过限制则轮转
        if let Ok(metadata) = fs::metadata(&file_path) {
            if metadata.len() > max_size {
                rotate_log(&file_path)?;
            }
        }

        let (writer, written) = open_file(&file_path)?;
        Ok(Self {
            file_path,
            max_size,
            written,
            writer,
        })
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        rotate_log(&self.file_path)?;

        let (writer, written) = open_file(&self.file_path)?;
        self.writer = writer;
        self.written = written;
        Ok(())
    }
}

fn open_file(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file_path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), len))
}

/// 轮转日志文件：xxx.log -> xxx.log.old，旧备份被覆盖
fn rotate_log(file_path: &Path) -> io::Result<()> {
    let backup_path = file_path.with_extension("log.old");

    if backup_path.exists() {
        fs::remove_file(&backup_path)?;
    }
    fs::rename(file_path, &backup_path)
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.writer.flush()?;
        self.written += n as u64;

        if self.written > self.max_size {
            self.rotate()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 获取日志目录路径（跟随数据存储位置）
pub fn get_log_dir() -> PathBuf {
    crate::data_dir().unwrap_or_else(|_| crate::default_data_dir())
}

/// 初始化日志系统
///
/// 文件日志通过后台线程写入，返回的 guard 需要一直持有到进程退出。
pub fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let config = LogConfig::load(log_dir);

    if !config.enabled {
        // 日志已禁用，只初始化一个空的 subscriber
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    // 创建日志级别过滤器
    let mut env_filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "sqlx=warn", "opendal=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    let console_layer = cfg!(debug_assertions).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer)
                .try_init();
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
            tracing::warn!("无法创建日志文件 {:?}: {}", log_dir, e);
            None
        }
    }
}
