use crate::core::comparator::Reconciler;
use crate::core::executor::{Executor, RetryPolicy, SyncSummary};
use crate::core::mapping::{Mapping, MappingStore};
use crate::core::progress::{ProgressSink, INDETERMINATE};
use crate::core::scanner::{FileScanner, ScanConfig};
use crate::error::{Result, SyncError};
use crate::storage::{LocalStore, RemoteStore, Side};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
    /// 扫描配置
    pub scan_config: ScanConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay_ms: 500,
            scan_config: ScanConfig::default(),
        }
    }
}

impl SyncConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.retry_base_delay_ms,
        }
    }
}

/// 同步引擎
///
/// 映射表由引擎独占，同一时间只允许一次同步。
pub struct SyncEngine {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    mappings: Mutex<MappingStore>,
    scanner: FileScanner,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        mappings: MappingStore,
        config: SyncConfig,
    ) -> Result<Self> {
        let scanner = FileScanner::with_config(config.scan_config.clone())
            .map_err(|e| SyncError::Config(format!("{:#}", e)))?;

        Ok(Self {
            local,
            remote,
            mappings: Mutex::new(mappings),
            scanner,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 取消同步，当前文件完成后停止
    ///
    /// 没有同步在运行时，取消请求保留到下一次同步并使其立即结束。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 检查是否已取消
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 当前映射表（按路径排序），同步进行中会等待其结束
    pub async fn mapping_snapshot(&self) -> Vec<Mapping> {
        self.mappings.lock().await.snapshot()
    }

    /// 运行一次同步
    pub async fn run_sync(&self, progress: &dyn ProgressSink) -> Result<SyncSummary> {
        let mut mappings = self
            .mappings
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;

        let span = info_span!("sync_pass", pass_id = %Uuid::new_v4());
        let result = self.run_pass(&mut mappings, progress).instrument(span).await;

        // 同步结束后才清除取消标志，开始前收到的取消请求作用于这次同步
        self.cancelled.store(false, Ordering::SeqCst);
        result
    }

    async fn run_pass(
        &self,
        mappings: &mut MappingStore,
        progress: &dyn ProgressSink,
    ) -> Result<SyncSummary> {
        let started = Instant::now();
        info!(
            "开始同步: {} <-> {} ({} 条映射)",
            self.local.name(),
            self.remote.name(),
            mappings.len()
        );

        // 任一侧扫描失败都放弃整次同步
        progress.report(INDETERMINATE, "正在扫描云端文件...");
        let remote_files = self
            .scanner
            .scan_remote(self.remote.as_ref())
            .await
            .map_err(|cause| {
                error!("扫描远程存储失败: {:#}", cause);
                SyncError::Enumeration {
                    side: Side::Remote,
                    cause,
                }
            })?;

        if self.is_cancelled() {
            return Ok(cancelled_summary());
        }

        progress.report(INDETERMINATE, "正在扫描本地文件...");
        let local_files = self
            .scanner
            .scan_local(self.local.as_ref())
            .await
            .map_err(|cause| {
                error!("扫描本地存储失败: {:#}", cause);
                SyncError::Enumeration {
                    side: Side::Local,
                    cause,
                }
            })?;

        if self.is_cancelled() {
            return Ok(cancelled_summary());
        }

        let plan = Reconciler::new(mappings.index()).plan(local_files, remote_files);

        let summary = Executor::new(
            self.local.as_ref(),
            self.remote.as_ref(),
            mappings,
            progress,
            &self.cancelled,
            self.config.retry_policy(),
        )
        .execute(plan)
        .await
        .inspect_err(|e| error!("同步中止: {}", e))?;

        progress.report(1.0, "正在完成...");
        info!(
            "同步完成: 上传 {}, 下载 {}, 删除本地 {}, 删除云端 {}, 未变化 {}, 失败 {}, 耗时 {:?}",
            summary.uploaded,
            summary.downloaded,
            summary.deleted_local,
            summary.deleted_cloud,
            summary.up_to_date,
            summary.failed.len(),
            started.elapsed()
        );

        Ok(summary)
    }
}

fn cancelled_summary() -> SyncSummary {
    info!("同步已取消");
    SyncSummary {
        cancelled: true,
        ..Default::default()
    }
}
