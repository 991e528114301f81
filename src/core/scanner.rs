use crate::core::mapping::fold_path;
use crate::storage::{EntryKind, FileRecord, LocalStore, RemoteStore, Side};
use anyhow::{Context, Result};
use regex::Regex;
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// 文件扫描器配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），不含 `/` 的规则只匹配文件名
    pub exclude_patterns: Vec<String>,
    /// 仅包含的扩展名（空表示不限制）
    pub include_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            include_extensions: vec![],
        }
    }
}

pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "desktop.ini".to_string(),
        "*.tmp".to_string(),
        "~*".to_string(),
    ]
}

/// 文件树扫描器：把一侧的目录树展开成按路径排序的记录列表
pub struct FileScanner {
    config: ScanConfig,
    excludes: Vec<(Regex, bool)>,
}

impl FileScanner {
    pub fn with_config(config: ScanConfig) -> Result<Self> {
        let excludes = config
            .exclude_patterns
            .iter()
            .map(|p| {
                let compiled = glob_to_regex(p)
                    .with_context(|| format!("invalid exclude pattern: {}", p))?;
                Ok((compiled, p.contains('/')))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, excludes })
    }

    /// 检查路径是否应该被排除
    fn should_exclude(&self, path: &str) -> bool {
        let name = crate::storage::file_name(path);
        for (re, full_path) in &self.excludes {
            let subject = if *full_path { path } else { name };
            if re.is_match(subject) {
                return true;
            }
        }

        // 检查扩展名
        if !self.config.include_extensions.is_empty() {
            let ext = std::path::Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .unwrap_or_default();

            if !self
                .config
                .include_extensions
                .iter()
                .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
            {
                return true;
            }
        }

        false
    }

    /// 扫描本地存储
    pub async fn scan_local(&self, storage: &dyn LocalStore) -> Result<Vec<FileRecord>> {
        info!("开始扫描存储: {}", storage.name());
        let records = storage.enumerate().await?;
        Ok(self.finish(Side::Local, records))
    }

    /// 扫描远程存储，深度优先逐个目录列出
    pub async fn scan_remote(&self, storage: &dyn RemoteStore) -> Result<Vec<FileRecord>> {
        info!("开始扫描存储: {}", storage.name());

        let root = storage.ensure_folder(&[]).await?;
        let mut pending = vec![(root, String::new())];
        let mut records = Vec::new();
        let mut folder_count = 0usize;

        while let Some((folder_id, prefix)) = pending.pop() {
            folder_count += 1;
            let children = storage
                .list_folder(&folder_id)
                .await
                .with_context(|| format!("listing remote folder {}/", prefix))?;

            let mut sub_folders = Vec::new();
            for child in children {
                let path = if prefix.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", prefix, child.name)
                };

                match child.kind {
                    EntryKind::Folder => sub_folders.push((child.id, path)),
                    EntryKind::File => {
                        records.push(FileRecord::remote(path, child.modified_time, child.id))
                    }
                }
            }

            // 反序压栈，保持目录内的处理顺序
            pending.extend(sub_folders.into_iter().rev());
        }

        debug!("远程扫描了 {} 个目录", folder_count);
        Ok(self.finish(Side::Remote, records))
    }

    /// 规范化、过滤、排序并去除大小写重复的路径
    fn finish(&self, side: Side, records: Vec<FileRecord>) -> Vec<FileRecord> {
        let total = records.len();
        let mut kept: Vec<FileRecord> = records
            .into_iter()
            .map(|mut r| {
                r.path = normalize_path(&r.path);
                r
            })
            .filter(|r| {
                let excluded = self.should_exclude(&r.path);
                if excluded {
                    debug!("排除文件: {}", r);
                }
                !excluded
            })
            .collect();
        let excluded_count = total - kept.len();

        sort_records(&mut kept);
        kept.dedup_by(|later, earlier| {
            let duplicate = fold_path(&later.path) == fold_path(&earlier.path);
            if duplicate {
                warn!("忽略仅大小写不同的重复路径: {} (保留 {})", later, earlier.path);
            }
            duplicate
        });

        info!(
            "{} 扫描完成: {} 个文件, {} 个被排除",
            side,
            kept.len(),
            excluded_count
        );
        kept
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self {
            config: ScanConfig {
                exclude_patterns: vec![],
                include_extensions: vec![],
            },
            excludes: vec![],
        }
    }
}

/// 统一分隔符并去掉开头的 `/`
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// 按不区分大小写的路径排序，合并扫描要求两侧都按这个顺序
pub fn compare_paths(a: &str, b: &str) -> Ordering {
    fold_path(a).cmp(&fold_path(b))
}

pub fn sort_records(records: &mut [FileRecord]) {
    records.sort_by(|a, b| compare_paths(&a.path, &b.path).then_with(|| a.path.cmp(&b.path)));
}

/// glob 转正则：`**` 跨目录，`*` 和 `?` 不跨目录，不区分大小写
fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let mut re = String::from("(?i)^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    re.push('$');
    Regex::new(&re)
}
