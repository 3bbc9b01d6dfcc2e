//! 文档实体存储
//!
//! 编排层只通过 `update` 推进状态、挂载结果地址。

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::{AppResult, DocumentError, StorageError};
use crate::infrastructure::object_store::{ArtifactLocation, ObjectStore};
use crate::models::{DocumentRecord, DocumentUpdate};

/// 文档实体存储能力
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> AppResult<Option<DocumentRecord>>;

    /// 创建实体；已存在时返回 `DocumentError::AlreadyExists`
    async fn create(&self, record: DocumentRecord) -> AppResult<DocumentRecord>;

    /// 更新实体；不存在时返回 `DocumentError::NotFound`
    async fn update(&self, id: &str, update: DocumentUpdate) -> AppResult<DocumentRecord>;
}

/// 以 JSON 形式存放在对象存储 `documents/` 前缀下的文档实体
pub struct ObjectDocumentStore<S> {
    store: S,
    bucket: String,
}

impl<S: ObjectStore> ObjectDocumentStore<S> {
    pub fn new(store: S, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    fn location(&self, id: &str) -> ArtifactLocation {
        ArtifactLocation::new(&self.bucket, format!("documents/{}.json", id))
    }

    async fn write(&self, record: &DocumentRecord) -> AppResult<()> {
        let value = serde_json::to_value(record)?;
        self.store.put_json(&self.location(&record.id), &value).await
    }
}

#[async_trait]
impl<S: ObjectStore> DocumentStore for ObjectDocumentStore<S> {
    async fn get(&self, id: &str) -> AppResult<Option<DocumentRecord>> {
        let location = self.location(id);
        match self.store.get_json(&location).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                StorageError::Corrupted {
                    location: location.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(None),
        }
    }

    async fn create(&self, record: DocumentRecord) -> AppResult<DocumentRecord> {
        if self.get(&record.id).await?.is_some() {
            return Err(DocumentError::AlreadyExists { id: record.id }.into());
        }
        self.write(&record).await?;
        debug!("创建文档 {} ({})", record.id, record.status);
        Ok(record)
    }

    async fn update(&self, id: &str, update: DocumentUpdate) -> AppResult<DocumentRecord> {
        if update.is_empty() {
            return Err(DocumentError::EmptyUpdate { id: id.to_string() }.into());
        }
        let mut record = self
            .get(id)
            .await?
            .ok_or_else(|| DocumentError::NotFound { id: id.to_string() })?;

        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(uri) = update.result_uri {
            record.result_uri = Some(uri);
        }
        record.updated_at = Utc::now();

        self.write(&record).await?;
        debug!("更新文档 {} → {}", id, record.status);
        Ok(record)
    }
}
