//! 三方比较：本地 vs 远程 vs 上次同步的映射
//!
//! 这里没有任何 IO，输入是两侧已排序的扫描结果和映射索引，输出是按动作分组的同步计划。

use crate::core::conflict::{collision_name, unique_name};
use crate::core::mapping::{fold_path, Mapping, MappingIndex};
use crate::core::scanner::{compare_paths, sort_records};
use crate::storage::FileRecord;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// 合并扫描得到的一对记录，至少一侧存在
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPair {
    pub local: Option<FileRecord>,
    pub remote: Option<FileRecord>,
}

impl PathPair {
    pub fn path(&self) -> &str {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(|r| r.path.as_str())
            .unwrap_or_default()
    }
}

/// 对两个已排序的序列做合并扫描，每个路径恰好出现一次
pub fn merge_join(local: Vec<FileRecord>, remote: Vec<FileRecord>) -> Vec<PathPair> {
    debug_assert!(local.windows(2).all(|w| compare_paths(&w[0].path, &w[1].path).is_le()));
    debug_assert!(remote.windows(2).all(|w| compare_paths(&w[0].path, &w[1].path).is_le()));

    let mut pairs = Vec::with_capacity(local.len().max(remote.len()));
    let mut local = local.into_iter().peekable();
    let mut remote = remote.into_iter().peekable();

    loop {
        let order = match (local.peek(), remote.peek()) {
            (Some(l), Some(r)) => compare_paths(&l.path, &r.path),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };

        let pair = match order {
            Ordering::Less => PathPair {
                local: local.next(),
                remote: None,
            },
            Ordering::Greater => PathPair {
                local: None,
                remote: remote.next(),
            },
            Ordering::Equal => PathPair {
                local: local.next(),
                remote: remote.next(),
            },
        };
        pairs.push(pair);
    }

    pairs
}

/// 两侧都有、从未映射过的同名文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub local: FileRecord,
    pub remote: FileRecord,
    /// 本地文件改名后的文件名（不含目录）
    pub renamed_to: String,
}

/// 两侧都有、至少一侧相对映射发生了变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPair {
    pub local: FileRecord,
    pub remote: FileRecord,
    pub mapping: Mapping,
}

/// 同步动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload(FileRecord),
    Download(FileRecord),
    DeleteLocal(FileRecord),
    DeleteRemote(FileRecord),
    Collision(Collision),
    Conflict(ConflictPair),
    UpToDate(FileRecord),
}

/// 按动作分组的同步计划，每组内保持路径顺序
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub delete_local: Vec<FileRecord>,
    pub delete_remote: Vec<FileRecord>,
    pub upload: Vec<FileRecord>,
    pub download: Vec<FileRecord>,
    pub collisions: Vec<Collision>,
    pub conflicts: Vec<ConflictPair>,
    pub up_to_date: Vec<FileRecord>,
}

impl SyncPlan {
    fn push(&mut self, action: SyncAction) {
        match action {
            SyncAction::Upload(r) => self.upload.push(r),
            SyncAction::Download(r) => self.download.push(r),
            SyncAction::DeleteLocal(r) => self.delete_local.push(r),
            SyncAction::DeleteRemote(r) => self.delete_remote.push(r),
            SyncAction::Collision(c) => self.collisions.push(c),
            SyncAction::Conflict(c) => self.conflicts.push(c),
            SyncAction::UpToDate(r) => self.up_to_date.push(r),
        }
    }

    /// 进度的分母：一次冲突改名对应上传和下载两个单位
    pub fn total_units(&self) -> usize {
        self.delete_local.len()
            + self.delete_remote.len()
            + self.upload.len()
            + self.download.len()
            + self.collisions.len() * 2
            + self.conflicts.len()
    }

    pub fn is_noop(&self) -> bool {
        self.total_units() == 0
    }

    pub fn summary(&self) -> ActionSummary {
        ActionSummary {
            delete_local: self.delete_local.len(),
            delete_remote: self.delete_remote.len(),
            upload: self.upload.len(),
            download: self.download.len(),
            collisions: self.collisions.len(),
            conflicts: self.conflicts.len(),
            up_to_date: self.up_to_date.len(),
        }
    }
}

/// 动作统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub delete_local: usize,
    pub delete_remote: usize,
    pub upload: usize,
    pub download: usize,
    pub collisions: usize,
    pub conflicts: usize,
    pub up_to_date: usize,
}

/// 协调器
pub struct Reconciler<'a> {
    mappings: &'a MappingIndex,
}

impl<'a> Reconciler<'a> {
    pub fn new(mappings: &'a MappingIndex) -> Self {
        Self { mappings }
    }

    /// 为一个路径选出唯一的动作
    pub fn classify(&self, pair: PathPair) -> SyncAction {
        let mapping = self.mappings.get(pair.path());

        match (pair.local, pair.remote) {
            // 远程没了：本地自上次同步后没改过就跟着删，否则重新上传
            (Some(local), None) => match mapping {
                Some(m) if local.modified_time <= m.local_modified_time => {
                    SyncAction::DeleteLocal(local)
                }
                _ => SyncAction::Upload(local),
            },

            (None, Some(remote)) => match mapping {
                Some(m) if remote.modified_time <= m.remote_modified_time => {
                    SyncAction::DeleteRemote(remote)
                }
                _ => SyncAction::Download(remote),
            },

            (Some(local), Some(remote)) => match mapping {
                None => SyncAction::Collision(Collision {
                    renamed_to: unique_name(&local),
                    local,
                    remote,
                }),
                Some(m)
                    if local.modified_time == m.local_modified_time
                        && remote.modified_time == m.remote_modified_time =>
                {
                    SyncAction::UpToDate(local)
                }
                Some(m) => SyncAction::Conflict(ConflictPair {
                    local,
                    remote,
                    mapping: m.clone(),
                }),
            },

            (None, None) => unreachable!("merge_join never yields an empty pair"),
        }
    }

    /// 生成同步计划，输入无需预先排序
    pub fn plan(&self, mut local: Vec<FileRecord>, mut remote: Vec<FileRecord>) -> SyncPlan {
        sort_records(&mut local);
        sort_records(&mut remote);

        let mut taken: HashSet<String> = local
            .iter()
            .chain(remote.iter())
            .map(|r| fold_path(&r.path))
            .collect();

        let mut plan = SyncPlan::default();
        for pair in merge_join(local, remote) {
            let mut action = self.classify(pair);
            if let SyncAction::Collision(collision) = &mut action {
                collision.renamed_to = free_name(&collision.local, &mut taken);
            }
            debug!("{:?}", action);
            plan.push(action);
        }

        plan
    }
}

/// 改名后的路径不能与任一侧已有的文件或本次选过的名字重名
fn free_name(local: &FileRecord, taken: &mut HashSet<String>) -> String {
    let parent = local.path.rsplit_once('/').map(|(parent, _)| parent);
    let mut attempt = 1;
    loop {
        let name = collision_name(local, attempt);
        let path = match parent {
            Some(parent) => format!("{}/{}", parent, name),
            None => name.clone(),
        };
        if taken.insert(fold_path(&path)) {
            return name;
        }
        attempt += 1;
    }
}
