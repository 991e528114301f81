//! 执行同步计划
//!
//! 按固定顺序处理各组动作：删除本地、删除远程、（碰撞改名）、上传、下载、冲突。
//! 每完成一个文件立即更新映射表；单个文件失败只记录，不影响其余文件。

use crate::core::comparator::{Collision, ConflictPair, SyncPlan};
use crate::core::conflict::{ConflictDecision, ConflictResolver};
use crate::core::mapping::{fold_path, Mapping, MappingStore};
use crate::core::progress::ProgressSink;
use crate::core::scanner::sort_records;
use crate::error::Result;
use crate::storage::{
    file_name, parent_segments, FileRecord, LocalStore, RemoteEntry, RemoteStore,
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 失败的动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DeleteLocal,
    DeleteRemote,
    Rename,
    Upload,
    Download,
    Conflict,
}

/// 单个文件的失败记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: String,
    pub action: ActionKind,
    pub error: String,
}

/// 一次同步的统计
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted_local: usize,
    pub deleted_cloud: usize,
    pub up_to_date: usize,
    pub failed: Vec<FileFailure>,
    pub cancelled: bool,
}

impl SyncSummary {
    /// 是否有任何改动两侧的操作
    pub fn changed_anything(&self) -> bool {
        self.uploaded + self.downloaded + self.deleted_local + self.deleted_cloud > 0
    }
}

/// 重试策略（指数退避）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// 执行操作，失败时重试，只适用于幂等操作
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
                    warn!(
                        "{} 失败，{}ms 后重试 ({}/{}): {:#}",
                        what,
                        delay,
                        attempt + 1,
                        self.max_retries,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn remote_id(record: &FileRecord) -> anyhow::Result<&str> {
    record
        .remote_id
        .as_deref()
        .ok_or_else(|| anyhow!("remote record {} has no id", record.path))
}

/// 计划执行器，只用于一次同步
pub struct Executor<'a> {
    local: &'a dyn LocalStore,
    remote: &'a dyn RemoteStore,
    mappings: &'a mut MappingStore,
    progress: &'a dyn ProgressSink,
    cancelled: &'a AtomicBool,
    retry: RetryPolicy,
    resolver: ConflictResolver,
    total: usize,
    done: usize,
    /// 本次观察到的路径（折叠后），扫尾时保留这些路径的映射
    seen: HashSet<String>,
    summary: SyncSummary,
}

impl<'a> Executor<'a> {
    pub fn new(
        local: &'a dyn LocalStore,
        remote: &'a dyn RemoteStore,
        mappings: &'a mut MappingStore,
        progress: &'a dyn ProgressSink,
        cancelled: &'a AtomicBool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            local,
            remote,
            mappings,
            progress,
            cancelled,
            retry,
            resolver: ConflictResolver,
            total: 0,
            done: 0,
            seen: HashSet::new(),
            summary: SyncSummary::default(),
        }
    }

    /// 执行整个计划，包括最后的映射清理
    ///
    /// 只有映射表读写失败会返回错误，存储操作失败记录在 `SyncSummary::failed`。
    pub async fn execute(mut self, plan: SyncPlan) -> Result<SyncSummary> {
        self.total = plan.total_units();
        info!("开始执行: {:?}", plan.summary());

        for record in &plan.up_to_date {
            self.mark_seen(&record.path);
        }
        self.summary.up_to_date = plan.up_to_date.len();

        self.run_buckets(plan).await?;

        if self.summary.cancelled {
            info!("同步已取消，跳过映射清理");
        } else {
            self.sweep().await?;
        }

        Ok(self.summary)
    }

    async fn run_buckets(&mut self, plan: SyncPlan) -> Result<()> {
        for record in plan.delete_local {
            if self.stop_requested() {
                return Ok(());
            }
            self.delete_local(record).await?;
        }

        for record in plan.delete_remote {
            if self.stop_requested() {
                return Ok(());
            }
            self.delete_remote(record).await?;
        }

        let mut uploads = plan.upload;
        let mut downloads = plan.download;
        for collision in plan.collisions {
            if self.stop_requested() {
                return Ok(());
            }
            if let Some((renamed, remote)) = self.rename_collision(collision).await {
                uploads.push(renamed);
                downloads.push(remote);
            }
        }
        sort_records(&mut uploads);
        sort_records(&mut downloads);

        for record in uploads {
            if self.stop_requested() {
                return Ok(());
            }
            self.upload(record).await?;
        }

        for record in downloads {
            if self.stop_requested() {
                return Ok(());
            }
            self.download(record).await?;
        }

        for conflict in plan.conflicts {
            if self.stop_requested() {
                return Ok(());
            }
            self.resolve_conflict(conflict).await?;
        }

        Ok(())
    }

    fn stop_requested(&mut self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            self.summary.cancelled = true;
        }
        self.summary.cancelled
    }

    fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f64 / self.total as f64).min(1.0)
        }
    }

    /// 在一个工作单元开始前报告进度
    fn step(&mut self, message: String) {
        self.progress.report(self.fraction(), &message);
        self.done += 1;
    }

    fn mark_seen(&mut self, path: &str) {
        self.seen.insert(fold_path(path));
    }

    /// 记录失败；失败路径的映射保持不变并视为已见，下次同步从同样的状态重新判断
    fn fail(&mut self, path: &str, action: ActionKind, err: anyhow::Error) {
        let message = format!("{:#}", err);
        warn!("{:?} 失败 {}: {}", action, path, message);
        self.progress.file_failed(path, &message);
        self.mark_seen(path);
        self.summary.failed.push(FileFailure {
            path: path.to_string(),
            action,
            error: message,
        });
    }

    async fn delete_local(&mut self, record: FileRecord) -> Result<()> {
        self.step(format!("正在删除 {}", record.path));

        let local = self.local;
        let path = record.path.as_str();
        let result = self
            .retry
            .run("删除本地文件", move || local.delete(path))
            .await;

        match result {
            Ok(()) => {
                self.mappings.remove(&record.path).await?;
                self.summary.deleted_local += 1;
                debug!("已删除本地文件: {}", record.path);
            }
            Err(e) => self.fail(&record.path, ActionKind::DeleteLocal, e),
        }
        Ok(())
    }

    async fn delete_remote(&mut self, record: FileRecord) -> Result<()> {
        self.step(format!("正在删除 {}", record.path));

        let remote = self.remote;
        let result = match remote_id(&record) {
            Ok(id) => {
                self.retry
                    .run("删除远程文件", move || remote.delete(id))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.mappings.remove(&record.path).await?;
                self.summary.deleted_cloud += 1;
                debug!("已删除远程文件: {}", record.path);
            }
            Err(e) => self.fail(&record.path, ActionKind::DeleteRemote, e),
        }
        Ok(())
    }

    /// 碰撞：本地文件先改名，返回待上传的改名文件和待下载到原路径的远程文件
    ///
    /// 改名失败时两者都跳过，否则下载会覆盖尚未改名的本地文件。
    async fn rename_collision(
        &mut self,
        collision: Collision,
    ) -> Option<(FileRecord, FileRecord)> {
        let Collision {
            local,
            remote,
            renamed_to,
        } = collision;

        self.progress
            .report(self.fraction(), &format!("正在重命名 {}", local.path));
        self.mark_seen(&local.path);

        // 改名不是幂等操作，不重试
        let result = self.local.rename(&local.path, &renamed_to).await;
        match result {
            Ok(new_path) => {
                info!("同名文件冲突，本地文件改名: {} -> {}", local.path, new_path);
                Some((FileRecord::local(new_path, local.modified_time), remote))
            }
            Err(e) => {
                // 上传和下载两个单位都不会执行
                self.done += 2;
                self.fail(&local.path, ActionKind::Rename, e);
                None
            }
        }
    }

    async fn upload(&mut self, record: FileRecord) -> Result<()> {
        self.step(format!("正在上传 {}", record.path));

        let result = self.push_file(&record, &record.path).await;
        match result {
            Ok(entry) => {
                self.mappings
                    .upsert(Mapping::new(
                        &record.path,
                        record.modified_time,
                        entry.modified_time,
                        entry.id,
                    ))
                    .await?;
                self.summary.uploaded += 1;
                self.mark_seen(&record.path);
            }
            Err(e) => self.fail(&record.path, ActionKind::Upload, e),
        }
        Ok(())
    }

    async fn download(&mut self, record: FileRecord) -> Result<()> {
        self.step(format!("正在下载 {}", record.path));

        let result = self.pull_file(&record, &record.path).await;
        match result {
            Ok((id, local_time)) => {
                self.mappings
                    .upsert(Mapping::new(
                        &record.path,
                        local_time,
                        record.modified_time,
                        id,
                    ))
                    .await?;
                self.summary.downloaded += 1;
                self.mark_seen(&record.path);
            }
            Err(e) => self.fail(&record.path, ActionKind::Download, e),
        }
        Ok(())
    }

    /// 冲突：较新一侧覆盖另一侧
    ///
    /// 两侧路径可能只有大小写不同，写入时沿用被覆盖一侧的拼写，否则大小写敏感的存储上会多出一个文件。
    async fn resolve_conflict(&mut self, conflict: ConflictPair) -> Result<()> {
        let decision = self.resolver.resolve(&conflict);
        let path = conflict.local.path.clone();
        debug!("冲突 {}: {}", path, decision);

        match decision {
            ConflictDecision::Refresh => {
                self.step(format!("正在检查 {}", path));
                let id = match remote_id(&conflict.remote) {
                    Ok(id) => id.to_string(),
                    Err(e) => {
                        self.fail(&path, ActionKind::Conflict, e);
                        return Ok(());
                    }
                };
                self.mappings
                    .upsert(Mapping::new(
                        &path,
                        conflict.local.modified_time,
                        conflict.remote.modified_time,
                        id,
                    ))
                    .await?;
                self.summary.up_to_date += 1;
                self.mark_seen(&path);
            }
            ConflictDecision::Upload => {
                self.step(format!("正在上传 {}", path));
                let result = self.push_file(&conflict.local, &conflict.remote.path).await;
                match result {
                    Ok(entry) => {
                        self.mappings
                            .upsert(Mapping::new(
                                &path,
                                conflict.local.modified_time,
                                entry.modified_time,
                                entry.id,
                            ))
                            .await?;
                        self.summary.uploaded += 1;
                        self.mark_seen(&path);
                    }
                    Err(e) => self.fail(&path, ActionKind::Conflict, e),
                }
            }
            ConflictDecision::Download => {
                self.step(format!("正在下载 {}", path));
                let result = self.pull_file(&conflict.remote, &path).await;
                match result {
                    Ok((id, local_time)) => {
                        self.mappings
                            .upsert(Mapping::new(
                                &path,
                                local_time,
                                conflict.remote.modified_time,
                                id,
                            ))
                            .await?;
                        self.summary.downloaded += 1;
                        self.mark_seen(&path);
                    }
                    Err(e) => self.fail(&path, ActionKind::Conflict, e),
                }
            }
        }
        Ok(())
    }

    /// 本地 -> 远程 `dest`，返回服务端报告的元数据
    async fn push_file(&self, record: &FileRecord, dest: &str) -> anyhow::Result<RemoteEntry> {
        let local = self.local;
        let remote = self.remote;
        let path = record.path.as_str();
        let name = file_name(dest);
        let segments = parent_segments(dest);
        let segments = segments.as_slice();

        let data = self
            .retry
            .run("读取本地文件", move || local.read(path))
            .await?;
        let folder_id = self
            .retry
            .run("创建远程目录", move || remote.ensure_folder(segments))
            .await?;
        let folder_id = folder_id.as_str();

        let entry = self
            .retry
            .run("上传", move || remote.upload(folder_id, name, data.clone()))
            .await?;
        debug!("上传完成: {} -> {}", path, entry.id);
        Ok(entry)
    }

    /// 远程 -> 本地 `path`（覆盖），返回远程 id 和写入后的本地修改时间
    async fn pull_file(
        &self,
        record: &FileRecord,
        path: &str,
    ) -> anyhow::Result<(String, DateTime<Utc>)> {
        let local = self.local;
        let remote = self.remote;
        let id = remote_id(record)?;

        let data = self
            .retry
            .run("下载", move || remote.download(id))
            .await?;
        self.retry
            .run("写入本地文件", move || local.write(path, data.clone(), true))
            .await?;
        let local_time = self
            .retry
            .run("读取修改时间", move || local.modified_time(path))
            .await?;

        debug!("下载完成: {} ({})", path, local_time);
        Ok((id.to_string(), local_time))
    }

    /// 删除两侧都没有出现的路径的映射
    async fn sweep(&mut self) -> Result<()> {
        let seen = &self.seen;
        let removed = self
            .mappings
            .retain(|m| seen.contains(&fold_path(&m.path)))
            .await
            .map_err(|e| {
                error!("清理映射失败: {}", e);
                e
            })?;

        if removed > 0 {
            info!("清理了 {} 条两侧都已不存在的映射", removed);
        }
        Ok(())
    }
}
