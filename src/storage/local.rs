use super::{FileRecord, LocalStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }
        let name = format!("local:{}", base_path.display());
        Ok(Self { base_path, name })
    }

    pub fn root(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    fn walk(base_path: &Path) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();

        for entry in WalkDir::new(base_path).follow_links(false) {
            let entry = entry.with_context(|| format!("walking {}", base_path.display()))?;
            if entry.file_type().is_dir() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(base_path)
                .with_context(|| format!("{} is outside the root", entry.path().display()))?;
            let relative = relative
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("non UTF-8 path: {}", relative.display()))?;

            let modified = entry
                .metadata()
                .with_context(|| format!("reading metadata of {}", relative))?
                .modified()?;

            records.push(FileRecord::local(
                Self::normalize_path(relative),
                DateTime::<Utc>::from(modified),
            ));
        }

        Ok(records)
    }
}

#[async_trait]
impl LocalStore for LocalStorage {
    async fn enumerate(&self) -> Result<Vec<FileRecord>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        // 使用 spawn_blocking 避免阻塞 async runtime
        let base_path = self.base_path.clone();
        tokio::task::spawn_blocking(move || Self::walk(&base_path)).await?
    }

    async fn read(&self, path: &str) -> Result<Bytes> {
        let data = fs::read(self.resolve_path(path))
            .await
            .with_context(|| format!("reading {}", path))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, path: &str, data: Bytes, overwrite: bool) -> Result<()> {
        let full_path = self.resolve_path(path);

        if !overwrite && fs::try_exists(&full_path).await? {
            anyhow::bail!("{} already exists", path);
        }

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // 使用临时文件写入，然后原子重命名
        let mut temp_path = full_path.clone().into_os_string();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, &data).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting {}", path)),
        }
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<String> {
        anyhow::ensure!(
            !new_name.contains('/') && !new_name.contains('\\'),
            "new name must not contain separators: {}",
            new_name
        );

        let new_path = match path.rsplit_once('/') {
            Some((dir, _)) => format!("{}/{}", dir, new_name),
            None => new_name.to_string(),
        };

        let from = self.resolve_path(path);
        let to = self.resolve_path(&new_path);
        if fs::try_exists(&to).await? {
            anyhow::bail!("cannot rename {}: {} already exists", path, new_path);
        }

        fs::rename(&from, &to)
            .await
            .with_context(|| format!("renaming {} to {}", path, new_path))?;
        Ok(new_path)
    }

    async fn modified_time(&self, path: &str) -> Result<DateTime<Utc>> {
        let metadata = fs::metadata(self.resolve_path(path))
            .await
            .with_context(|| format!("stat {}", path))?;
        Ok(DateTime::<Utc>::from(metadata.modified()?))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
