//! 文档级中间结果
//!
//! 按文档保存已提取的字段和每页的 accuracy。多个页面并发写入时，
//! 每次都是"读取 → 按字段名合并 → 写回"，同一文档的写入在进程内串行化。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppResult, StorageError};
use crate::infrastructure::{ArtifactLocation, ObjectStore};
use crate::models::{ExtractedField, FieldCatalog};
use crate::services::response_reconciler::ResponseReconciler;

/// 中间结果 `{fields, pages: {page → accuracy}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateResult {
    #[serde(default)]
    pub fields: Vec<ExtractedField>,
    #[serde(default)]
    pub pages: BTreeMap<u32, f64>,
}

impl IntermediateResult {
    /// 各页 accuracy 的平均值，没有页面时为 0
    pub fn accuracy(&self) -> f64 {
        if self.pages.is_empty() {
            return 0.0;
        }
        self.pages.values().sum::<f64>() / self.pages.len() as f64
    }

    /// 字段目录中还没有取到值的字段
    pub fn pending(&self, catalog: &FieldCatalog) -> FieldCatalog {
        catalog.subset(|def| {
            !self
                .fields
                .iter()
                .any(|f| f.field_name == def.name && !f.is_empty())
        })
    }
}

/// 中间结果存储
pub struct IntermediateStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    reconciler: ResponseReconciler,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IntermediateStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, catalog: FieldCatalog) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            reconciler: ResponseReconciler::new(catalog),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// `OUTPUT_BUCKET/text/<filename>.json`
    pub fn location(&self, filename: &str) -> ArtifactLocation {
        ArtifactLocation::new(&self.bucket, format!("text/{}.json", filename))
    }

    pub async fn load(&self, filename: &str) -> AppResult<IntermediateResult> {
        let location = self.location(filename);
        match self.store.get_json(&location).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                StorageError::Corrupted {
                    location: location.to_string(),
                    reason: e.to_string(),
                }
                .into()
            }),
            None => Ok(IntermediateResult::default()),
        }
    }

    /// 写入空的中间结果
    pub async fn seed(&self, filename: &str) -> AppResult<ArtifactLocation> {
        self.serialized(filename, async {
            let location = self.location(filename);
            let value = serde_json::to_value(IntermediateResult::default())?;
            self.store.put_json(&location, &value).await?;
            Ok(location)
        })
        .await
    }

    /// 把一页的结果合并进中间结果
    pub async fn merge_page(
        &self,
        filename: &str,
        page: u32,
        fields: &[ExtractedField],
        accuracy: f64,
    ) -> AppResult<IntermediateResult> {
        self.serialized(filename, async {
            let mut current = self.load(filename).await?;
            current.fields = self.reconciler.merge(&current.fields, fields);
            current.pages.insert(page, accuracy);

            let value = serde_json::to_value(&current)?;
            self.store.put_json(&self.location(filename), &value).await?;

            debug!(
                "中间结果 {} 合并第 {} 页: 共 {} 个字段",
                filename,
                page,
                current.fields.len()
            );
            Ok(current)
        })
        .await
    }

    /// 记录一页已处理但没有新字段（跳过推理时）
    pub async fn mark_page(&self, filename: &str, page: u32, accuracy: f64) -> AppResult<()> {
        self.merge_page(filename, page, &[], accuracy).await.map(|_| ())
    }

    /// 持有文档锁执行 `work`，结束后没有其他等待者时移除该文档的锁
    async fn serialized<T>(
        &self,
        filename: &str,
        work: impl Future<Output = AppResult<T>>,
    ) -> AppResult<T> {
        let doc_lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(filename.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let output = {
            let _guard = doc_lock.lock().await;
            work.await
        };
        drop(doc_lock);

        // 克隆和移除都在 map 锁内进行，计数为 1 说明只剩 map 自己持有
        let mut locks = self.locks.lock().await;
        if locks
            .get(filename)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(filename);
        }
        output
    }
}
