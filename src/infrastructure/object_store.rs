//! 对象存储 - 基础设施层
//!
//! 只暴露"按地址读写字节"的能力：
//! - 写入任意字节或 JSON
//! - 读取时区分"不存在"（`Ok(None)`）与"读取出错"（`Err`）
//! - 生成可寻址的 URL，供模型端点拉取页面图片
//!
//! 提供内存实现（测试 / 本地调度）与本地磁盘实现。

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{AppError, AppResult, StorageError};

/// 产物地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
}

impl ArtifactLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// key 的最后一段
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl Display for ArtifactLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

impl FromStr for ArtifactLocation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidUri { uri: s.to_string() };
        let (_, rest) = s.split_once("://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        let key = key.trim_end_matches('/');
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid().into());
        }
        Ok(Self::new(bucket, key))
    }
}

/// 对象存储能力
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 写入字节
    async fn put(&self, location: &ArtifactLocation, body: Vec<u8>, content_type: &str)
        -> AppResult<()>;

    /// 读取字节，不存在时返回 `Ok(None)`
    async fn get(&self, location: &ArtifactLocation) -> AppResult<Option<Vec<u8>>>;

    /// 生成可寻址的 URL
    fn presign(&self, location: &ArtifactLocation) -> String;

    async fn put_json(&self, location: &ArtifactLocation, value: &Value) -> AppResult<()> {
        let body = serde_json::to_vec(value)?;
        debug!("写入 {} ({} 字节)", location, body.len());
        self.put(location, body, "application/json").await
    }

    /// 读取并解析 JSON；内容无法解析时返回 `StorageError::Corrupted`
    async fn get_json(&self, location: &ArtifactLocation) -> AppResult<Option<Value>> {
        match self.get(location).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StorageError::Corrupted {
                    location: location.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    async fn put(
        &self,
        location: &ArtifactLocation,
        body: Vec<u8>,
        content_type: &str,
    ) -> AppResult<()> {
        (**self).put(location, body, content_type).await
    }

    async fn get(&self, location: &ArtifactLocation) -> AppResult<Option<Vec<u8>>> {
        (**self).get(location).await
    }

    fn presign(&self, location: &ArtifactLocation) -> String {
        (**self).presign(location)
    }
}

// ========== 内存实现 ==========

/// 内存对象存储
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ArtifactLocation, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, location: &ArtifactLocation) -> bool {
        self.objects.read().await.contains_key(location)
    }

    /// 某个 bucket 下以 `prefix` 开头的 key，按字典序
    pub async fn keys(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .await
            .keys()
            .filter(|loc| loc.bucket == bucket && loc.key.starts_with(prefix))
            .map(|loc| loc.key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        location: &ArtifactLocation,
        body: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<()> {
        self.objects.write().await.insert(location.clone(), body);
        Ok(())
    }

    async fn get(&self, location: &ArtifactLocation) -> AppResult<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(location).cloned())
    }

    fn presign(&self, location: &ArtifactLocation) -> String {
        format!("memory://{}/{}", location.bucket, location.key)
    }
}

// ========== 本地磁盘实现 ==========

/// 本地磁盘对象存储：`root/bucket/key`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 地址对应的文件路径；拒绝越出根目录的 key
    pub fn path_for(&self, location: &ArtifactLocation) -> AppResult<PathBuf> {
        let relative = Path::new(&location.bucket).join(&location.key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StorageError::InvalidUri {
                uri: location.to_string(),
            }
            .into());
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        location: &ArtifactLocation,
        body: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<()> {
        let path = self.path_for(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::write_failed(location, e))?;
        }

        // 先写临时文件再重命名，读者不会看到写了一半的产物
        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            location.file_name(),
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| AppError::write_failed(location, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::write_failed(location, e))?;
        Ok(())
    }

    async fn get(&self, location: &ArtifactLocation) -> AppResult<Option<Vec<u8>>> {
        let path = self.path_for(location)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::read_failed(location, e)),
        }
    }

    fn presign(&self, location: &ArtifactLocation) -> String {
        let path = self.root.join(&location.bucket).join(&location.key);
        let absolute = std::path::absolute(&path).unwrap_or(path);
        format!("file://{}", absolute.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_location_round_trip() {
        let loc: ArtifactLocation = "s3://async/input/job-1/input.json".parse().unwrap();
        assert_eq!(loc.bucket, "async");
        assert_eq!(loc.key, "input/job-1/input.json");
        assert_eq!(loc.file_name(), "input.json");
        assert_eq!(loc.to_string(), "s3://async/input/job-1/input.json");
    }

    #[test]
    fn test_location_rejects_garbage() {
        assert_err!("not a uri".parse::<ArtifactLocation>());
        assert_err!("s3://bucket-only".parse::<ArtifactLocation>());
        assert_err!("s3:///key".parse::<ArtifactLocation>());
    }

    #[tokio::test]
    async fn test_memory_absent_is_none() {
        let store = MemoryObjectStore::new();
        let loc = ArtifactLocation::new("output", "missing.json");
        assert_eq!(assert_ok!(store.get(&loc).await), None);

        store.put_json(&loc, &json!({"a": 1})).await.unwrap();
        let value = store.get_json(&loc).await.unwrap().unwrap();
        assert_eq!(value["a"], json!(1));
    }

    #[tokio::test]
    async fn test_corrupted_json_is_error() {
        let store = MemoryObjectStore::new();
        let loc = ArtifactLocation::new("output", "broken.json");
        store.put(&loc, b"{oops".to_vec(), "application/json").await.unwrap();
        assert!(matches!(
            store.get_json(&loc).await,
            Err(AppError::Storage(StorageError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let loc = ArtifactLocation::new("output", "text/referral.pdf.json");

        assert_eq!(store.get(&loc).await.unwrap(), None);
        store.put(&loc, b"hello".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get(&loc).await.unwrap().unwrap(), b"hello".to_vec());
        assert!(store.presign(&loc).starts_with("file://"));
    }

    #[test]
    fn test_local_store_rejects_escape() {
        let store = LocalObjectStore::new("/tmp/store");
        let loc = ArtifactLocation::new("output", "../../etc/passwd");
        assert!(store.path_for(&loc).is_err());
    }
}
