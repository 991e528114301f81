use crate::core::comparator::ConflictPair;
use crate::storage::FileRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

/// 冲突处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// 两侧相对映射的变化时间相同，只刷新映射
    Refresh,
    /// 本地较新，覆盖远程
    Upload,
    /// 远程较新，覆盖本地
    Download,
}

impl std::fmt::Display for ConflictDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictDecision::Refresh => write!(f, "refresh"),
            ConflictDecision::Upload => write!(f, "upload"),
            ConflictDecision::Download => write!(f, "download"),
        }
    }
}

/// 比较时间：自上次同步后未变化的一侧视为最早时间
///
/// 远程的修改时间是上传时间而不是编辑时间，直接比较两侧的原始时间没有意义。
pub fn comparison_time(observed: DateTime<Utc>, mapped: DateTime<Utc>) -> DateTime<Utc> {
    if observed != mapped {
        observed
    } else {
        DateTime::<Utc>::MIN_UTC
    }
}

/// 冲突解决器
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve(&self, conflict: &ConflictPair) -> ConflictDecision {
        let local = comparison_time(
            conflict.local.modified_time,
            conflict.mapping.local_modified_time,
        );
        let remote = comparison_time(
            conflict.remote.modified_time,
            conflict.mapping.remote_modified_time,
        );

        match local.cmp(&remote) {
            std::cmp::Ordering::Greater => ConflictDecision::Upload,
            std::cmp::Ordering::Less => ConflictDecision::Download,
            std::cmp::Ordering::Equal => ConflictDecision::Refresh,
        }
    }
}

/// 生成碰撞时本地文件的新名字：`<主名> (<UTC 秒级时间>)<扩展名>`
pub fn unique_name(record: &FileRecord) -> String {
    collision_name(record, 1)
}

/// 第 `attempt` 个候选名字，从 2 开始在时间后追加序号：`<主名> (<时间>) (<序号>)<扩展名>`
pub fn collision_name(record: &FileRecord, attempt: u32) -> String {
    let name = record.file_name();
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let stamp = record.modified_time.format("%Y-%m-%d-%H-%M-%S");

    if attempt <= 1 {
        format!("{} ({}){}", stem, stamp, ext)
    } else {
        format!("{} ({}) ({}){}", stem, stamp, attempt, ext)
    }
}
