use super::{EntryKind, RemoteEntry, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;

/// 基于 OpenDAL 的远程存储
///
/// id 就是 operator 内的路径：目录以 `/` 结尾，文件不带。所有内容都位于
/// `folder` 目录之下。
pub struct OpendalRemote {
    operator: Operator,
    folder: String,
    name: String,
}

impl OpendalRemote {
    /// 用普通目录充当远程存储（网盘挂载目录等）
    pub fn fs(root: &str, folder: &str) -> Result<Self> {
        use opendal::services::Fs;

        let operator = Operator::new(Fs::default().root(root))?.finish();
        Ok(Self::with_operator(operator, folder, format!("fs://{}", root)))
    }

    pub fn webdav(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
        folder: &str,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self::with_operator(operator, folder, name))
    }

    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<String>,
        prefix: Option<String>,
        folder: &str,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(ref p) = prefix {
            builder = builder.root(p);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "s3://{}{}",
            bucket,
            prefix
                .as_deref()
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        );

        Ok(Self::with_operator(operator, folder, name))
    }

    pub fn with_operator(operator: Operator, folder: &str, name: String) -> Self {
        let folder = folder.trim_matches('/');
        let folder = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };
        let name = format!("{}/{}", name.trim_end_matches('/'), folder);
        Self {
            operator,
            folder,
            name,
        }
    }

    /// 元数据缺少修改时间时补一次 stat
    async fn entry_from(&self, path: &str, name: &str, meta: &Metadata) -> Result<RemoteEntry> {
        let kind = if meta.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };

        let modified_time = match meta.last_modified() {
            Some(t) => t,
            None if kind == EntryKind::Folder => chrono::DateTime::<chrono::Utc>::default(),
            None => self
                .operator
                .stat(path)
                .await?
                .last_modified()
                .ok_or_else(|| anyhow::anyhow!("{} has no modification time", path))?,
        };

        Ok(RemoteEntry {
            id: path.to_string(),
            name: name.trim_end_matches('/').to_string(),
            kind,
            modified_time,
        })
    }

    fn sibling_path(id: &str, new_name: &str) -> String {
        match id.rsplit_once('/') {
            Some((dir, _)) => format!("{}/{}", dir, new_name),
            None => new_name.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for OpendalRemote {
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let mut lister = self
            .operator
            .lister_with(folder_id)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await
            .with_context(|| format!("listing {}", folder_id))?;

        let mut entries = Vec::new();
        while let Some(entry) = lister.try_next().await? {
            let path = entry.path();

            // 部分服务会把目录自身也列出来
            if path.is_empty() || path == "/" || path == folder_id {
                continue;
            }

            entries.push(self.entry_from(path, entry.name(), entry.metadata()).await?);
        }

        Ok(entries)
    }

    async fn upload(&self, folder_id: &str, name: &str, data: Bytes) -> Result<RemoteEntry> {
        let path = format!("{}{}", folder_id, name);
        self.operator
            .write(&path, data)
            .await
            .with_context(|| format!("uploading {}", path))?;

        // 写入结果不含元数据，需要再 stat 一次拿到服务端时间
        let meta = self.operator.stat(&path).await?;
        self.entry_from(&path, name, &meta).await
    }

    async fn download(&self, id: &str) -> Result<Bytes> {
        let data = self
            .operator
            .read(id)
            .await
            .with_context(|| format!("downloading {}", id))?;
        Ok(data.to_bytes())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        match self.operator.delete(id).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<RemoteEntry> {
        let new_path = Self::sibling_path(id, new_name);

        if self.operator.info().full_capability().rename {
            self.operator.rename(id, &new_path).await?;
        } else {
            // S3 这类没有 rename 的服务只能复制后删除
            self.operator.copy(id, &new_path).await?;
            self.operator.delete(id).await?;
        }

        let meta = self.operator.stat(&new_path).await?;
        self.entry_from(&new_path, new_name, &meta).await
    }

    async fn ensure_folder(&self, segments: &[&str]) -> Result<String> {
        let mut current = self.folder.clone();
        if !current.is_empty() {
            self.operator
                .create_dir(&current)
                .await
                .with_context(|| format!("creating {}", current))?;
        }

        // TODO: 缓存已确认存在的目录，避免每次上传都逐级创建
        for segment in segments {
            current.push_str(segment);
            current.push('/');
            self.operator
                .create_dir(&current)
                .await
                .with_context(|| format!("creating {}", current))?;
        }

        if current.is_empty() {
            // 没有同步目录时直接使用存储根目录
            return Ok("/".to_string());
        }
        Ok(current)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
