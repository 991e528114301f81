//! 映射表 - 记录每个路径上次同步完成时两侧的状态
//!
//! 有映射说明该路径曾经在两侧同步过；没有映射说明本机从未见过它。

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

/// 单个路径的同步映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub path: String,
    pub local_modified_time: DateTime<Utc>,
    pub remote_modified_time: DateTime<Utc>,
    pub remote_id: String,
}

impl Mapping {
    pub fn new(
        path: impl Into<String>,
        local_modified_time: DateTime<Utc>,
        remote_modified_time: DateTime<Utc>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            local_modified_time,
            remote_modified_time,
            remote_id: remote_id.into(),
        }
    }
}

/// 路径比较键（不区分大小写）
pub fn fold_path(path: &str) -> String {
    path.to_lowercase()
}

/// 纯内存的映射索引，协调器只依赖它做查询
#[derive(Debug, Clone, Default)]
pub struct MappingIndex {
    entries: HashMap<String, Mapping>,
}

impl MappingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&Mapping> {
        self.entries.get(&fold_path(path))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(&fold_path(path))
    }

    pub fn insert(&mut self, mapping: Mapping) -> Option<Mapping> {
        self.entries.insert(fold_path(&mapping.path), mapping)
    }

    pub fn remove(&mut self, path: &str) -> Option<Mapping> {
        self.entries.remove(&fold_path(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mapping> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Mapping> for MappingIndex {
    fn from_iter<I: IntoIterator<Item = Mapping>>(iter: I) -> Self {
        let mut index = MappingIndex::new();
        for mapping in iter {
            index.insert(mapping);
        }
        index
    }
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    path: String,
    local_modified_secs: i64,
    local_modified_nanos: i64,
    remote_modified_secs: i64,
    remote_modified_nanos: i64,
    remote_id: String,
}

impl TryFrom<MappingRow> for Mapping {
    type Error = SyncError;

    fn try_from(row: MappingRow) -> Result<Self> {
        Ok(Mapping {
            local_modified_time: from_parts(
                &row.path,
                row.local_modified_secs,
                row.local_modified_nanos,
            )?,
            remote_modified_time: from_parts(
                &row.path,
                row.remote_modified_secs,
                row.remote_modified_nanos,
            )?,
            path: row.path,
            remote_id: row.remote_id,
        })
    }
}

/// 秒 + 纳秒分开保存，任何 `DateTime<Utc>` 都能原样写入和读回
fn to_parts(time: DateTime<Utc>) -> (i64, i64) {
    (time.timestamp(), i64::from(time.timestamp_subsec_nanos()))
}

fn from_parts(path: &str, secs: i64, nanos: i64) -> Result<DateTime<Utc>> {
    u32::try_from(nanos)
        .ok()
        .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
        .ok_or_else(|| SyncError::CorruptMapping {
            path: path.to_string(),
            reason: format!("timestamp {}.{:09} out of range", secs, nanos),
        })
}

/// 映射表：启动时一次性加载，之后每次修改立即写库（不做批量）
///
/// 同步中途崩溃时，库里恰好是已完成操作对应的状态。
pub struct MappingStore {
    db: SqlitePool,
    index: MappingIndex,
}

impl MappingStore {
    /// 加载全部映射，表不存在时由迁移创建为空表
    pub async fn load(db: SqlitePool) -> Result<Self> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"SELECT path, local_modified_secs, local_modified_nanos,
                      remote_modified_secs, remote_modified_nanos, remote_id
               FROM mappings"#,
        )
        .fetch_all(&db)
        .await?;

        let index = rows
            .into_iter()
            .map(Mapping::try_from)
            .collect::<Result<MappingIndex>>()?;

        debug!("加载了 {} 条映射", index.len());
        Ok(Self { db, index })
    }

    pub fn index(&self) -> &MappingIndex {
        &self.index
    }

    pub fn get(&self, path: &str) -> Option<&Mapping> {
        self.index.get(path)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// 按路径排序的快照
    pub fn snapshot(&self) -> Vec<Mapping> {
        let mut all: Vec<_> = self.index.iter().cloned().collect();
        all.sort_by_key(|m| fold_path(&m.path));
        all
    }

    /// 新增或整体替换一条映射
    pub async fn upsert(&mut self, mapping: Mapping) -> Result<()> {
        let (local_secs, local_nanos) = to_parts(mapping.local_modified_time);
        let (remote_secs, remote_nanos) = to_parts(mapping.remote_modified_time);
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"INSERT INTO mappings (path_key, path, local_modified_secs, local_modified_nanos,
                                     remote_modified_secs, remote_modified_nanos, remote_id, synced_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(path_key) DO UPDATE SET
                   path = excluded.path,
                   local_modified_secs = excluded.local_modified_secs,
                   local_modified_nanos = excluded.local_modified_nanos,
                   remote_modified_secs = excluded.remote_modified_secs,
                   remote_modified_nanos = excluded.remote_modified_nanos,
                   remote_id = excluded.remote_id,
                   synced_at = excluded.synced_at"#,
        )
        .bind(fold_path(&mapping.path))
        .bind(&mapping.path)
        .bind(local_secs)
        .bind(local_nanos)
        .bind(remote_secs)
        .bind(remote_nanos)
        .bind(&mapping.remote_id)
        .bind(now)
        .execute(&self.db)
        .await?;

        self.index.insert(mapping);
        Ok(())
    }

    /// 删除映射，返回是否存在
    pub async fn remove(&mut self, path: &str) -> Result<bool> {
        sqlx::query("DELETE FROM mappings WHERE path_key = ?")
            .bind(fold_path(path))
            .execute(&self.db)
            .await?;

        Ok(self.index.remove(path).is_some())
    }

    /// 删除所有不满足条件的映射，返回删除数量
    pub async fn retain<F>(&mut self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&Mapping) -> bool,
    {
        let doomed: Vec<String> = self
            .index
            .iter()
            .filter(|m| !keep(*m))
            .map(|m| m.path.clone())
            .collect();

        for path in &doomed {
            self.remove(path).await?;
        }

        Ok(doomed.len())
    }
}
