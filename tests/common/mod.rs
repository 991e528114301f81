//! 内存中的假存储，时钟可控，可以对指定路径注入失败

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tracksync_lib::core::{Mapping, MappingStore, ScanConfig, SyncConfig, SyncEngine};
use tracksync_lib::storage::{EntryKind, FileRecord, LocalStore, RemoteEntry, RemoteStore};

pub fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Default)]
struct FakeState {
    files: BTreeMap<String, (Bytes, DateTime<Utc>)>,
    folders: BTreeSet<String>,
    clock: i64,
    failures: HashSet<(String, String)>,
    fail_enumeration: bool,
    ops: Vec<String>,
}

impl FakeState {
    fn check(&mut self, op: &str, path: &str) -> Result<()> {
        self.ops.push(format!("{} {}", op, path));
        if self.failures.contains(&(op.to_string(), path.to_string())) {
            bail!("injected {} failure for {}", op, path);
        }
        Ok(())
    }

    fn tick(&mut self, base: i64) -> DateTime<Utc> {
        self.clock += 1;
        t(base + self.clock)
    }
}

/// 两个假存储共用的测试辅助方法
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn put(&self, path: &str, content: &str, modified: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (Bytes::from(content.to_string()), modified));
    }

    pub fn remove(&self, path: &str) {
        self.state.lock().unwrap().files.remove(path);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|(data, _)| String::from_utf8_lossy(data).into_owned())
    }

    pub fn modified(&self, path: &str) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().files.get(path).map(|(_, m)| *m)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// `op` 是 read / write / delete / rename / upload / download
    pub fn fail_on(&self, op: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op.to_string(), path.to_string()));
    }

    pub fn fail_enumeration(&self) {
        self.state.lock().unwrap().fail_enumeration = true;
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }
}

/// 本地时钟从 t(10_000) 往后走
const LOCAL_CLOCK: i64 = 10_000;
/// 远程修改时间是上传时间，从 t(50_000) 往后走
const REMOTE_CLOCK: i64 = 50_000;

pub struct FakeLocal(pub FakeStore);

impl std::ops::Deref for FakeLocal {
    type Target = FakeStore;

    fn deref(&self) -> &FakeStore {
        &self.0
    }
}

#[async_trait]
impl LocalStore for FakeLocal {
    async fn enumerate(&self) -> Result<Vec<FileRecord>> {
        let state = self.0.state.lock().unwrap();
        if state.fail_enumeration {
            bail!("local disk unavailable");
        }
        Ok(state
            .files
            .iter()
            .map(|(path, (_, modified))| FileRecord::local(path.clone(), *modified))
            .collect())
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let mut state = self.0.state.lock().unwrap();
        state.check("read", path)?;
        state
            .files
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| anyhow!("no local file {}", path))
    }

    async fn write(&self, path: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let mut state = self.0.state.lock().unwrap();
        state.check("write", path)?;
        if !overwrite && state.files.contains_key(path) {
            bail!("{} already exists", path);
        }
        let modified = state.tick(LOCAL_CLOCK);
        state.files.insert(path.to_string(), (data, modified));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.0.state.lock().unwrap();
        state.check("delete", path)?;
        state.files.remove(path);
        Ok(())
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<String> {
        let mut state = self.0.state.lock().unwrap();
        state.check("rename", path)?;
        let new_path = match path.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", parent, new_name),
            None => new_name.to_string(),
        };
        if state.files.contains_key(&new_path) {
            bail!("{} already exists", new_path);
        }
        let entry = state
            .files
            .remove(path)
            .ok_or_else(|| anyhow!("no local file {}", path))?;
        state.files.insert(new_path.clone(), entry);
        Ok(new_path)
    }

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>> {
        self.0
            .modified(path)
            .ok_or_else(|| anyhow!("no local file {}", path))
    }

    fn name(&self) -> &str {
        "fake-local"
    }
}

/// 远程 id 就是路径，目录 id 以 `/` 结尾，根目录为空串
pub struct FakeRemote {
    store: FakeStore,
    /// 测试持有这把锁时，目录列举会一直等待
    pub listing_gate: tokio::sync::Mutex<()>,
}

impl std::ops::Deref for FakeRemote {
    type Target = FakeStore;

    fn deref(&self) -> &FakeStore {
        &self.store
    }
}

impl FakeRemote {
    fn entry(id: &str, name: &str, kind: EntryKind, modified: DateTime<Utc>) -> RemoteEntry {
        RemoteEntry {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            modified_time: modified,
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let _gate = self.listing_gate.lock().await;
        let state = self.store.state.lock().unwrap();
        if state.fail_enumeration {
            bail!("remote listing failed for {:?}", folder_id);
        }

        let mut entries = Vec::new();
        let mut sub_folders = BTreeSet::new();
        for (path, (_, modified)) in &state.files {
            let Some(rest) = path.strip_prefix(folder_id) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    sub_folders.insert(folder.to_string());
                }
                None => entries.push(Self::entry(path, rest, EntryKind::File, *modified)),
            }
        }
        for folder in &state.folders {
            if let Some(rest) = folder.strip_prefix(folder_id) {
                if let Some((name, "")) = rest.split_once('/') {
                    sub_folders.insert(name.to_string());
                }
            }
        }
        for name in sub_folders {
            let id = format!("{}{}/", folder_id, name);
            entries.push(Self::entry(&id, &name, EntryKind::Folder, t(0)));
        }
        Ok(entries)
    }

    async fn upload(&self, folder_id: &str, name: &str, data: Bytes) -> Result<RemoteEntry> {
        let path = format!("{}{}", folder_id, name);
        let mut state = self.store.state.lock().unwrap();
        state.check("upload", &path)?;
        let modified = state.tick(REMOTE_CLOCK);
        state.files.insert(path.clone(), (data, modified));
        Ok(Self::entry(&path, name, EntryKind::File, modified))
    }

    async fn download(&self, id: &str) -> Result<Bytes> {
        let mut state = self.store.state.lock().unwrap();
        state.check("download", id)?;
        state
            .files
            .get(id)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| anyhow!("no remote file {}", id))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.store.state.lock().unwrap();
        state.check("delete", id)?;
        state.files.remove(id);
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteEntry> {
        let mut state = self.store.state.lock().unwrap();
        state.check("rename", id)?;
        let new_id = match id.rsplit_once('/') {
            Some((parent, _)) => format!("{}/{}", parent, new_name),
            None => new_name.to_string(),
        };
        let (data, modified) = state
            .files
            .remove(id)
            .ok_or_else(|| anyhow!("no remote file {}", id))?;
        state.files.insert(new_id.clone(), (data, modified));
        Ok(Self::entry(&new_id, new_name, EntryKind::File, modified))
    }

    async fn ensure_folder(&self, segments: &[&str]) -> Result<String> {
        if segments.is_empty() {
            return Ok(String::new());
        }
        let id = format!("{}/", segments.join("/"));
        self.store.state.lock().unwrap().folders.insert(id.clone());
        Ok(id)
    }

    fn name(&self) -> &str {
        "fake-remote"
    }
}

pub struct Harness {
    pub local: Arc<FakeLocal>,
    pub remote: Arc<FakeRemote>,
    pub engine: SyncEngine,
}

impl Harness {
    pub async fn mappings(&self) -> Vec<Mapping> {
        self.engine.mapping_snapshot().await
    }

    pub async fn mapping(&self, path: &str) -> Option<Mapping> {
        self.mappings()
            .await
            .into_iter()
            .find(|m| m.path.eq_ignore_ascii_case(path))
    }

    pub fn clear_ops(&self) {
        self.local.clear_ops();
        self.remote.clear_ops();
    }
}

/// 两侧为空、映射表预置 `seed` 的同步环境；测试先往两侧放文件再同步
pub async fn harness(seed: Vec<Mapping>) -> Harness {
    let pool = tracksync_lib::db::memory_pool().await.unwrap();
    let mut store = MappingStore::load(pool).await.unwrap();
    for mapping in seed {
        store.upsert(mapping).await.unwrap();
    }

    let local = Arc::new(FakeLocal(FakeStore::new()));
    let remote = Arc::new(FakeRemote {
        store: FakeStore::new(),
        listing_gate: tokio::sync::Mutex::new(()),
    });

    let config = SyncConfig {
        max_retries: 1,
        retry_base_delay_ms: 0,
        scan_config: ScanConfig::default(),
    };
    let engine = SyncEngine::new(local.clone(), remote.clone(), store, config).unwrap();

    Harness {
        local,
        remote,
        engine,
    }
}
