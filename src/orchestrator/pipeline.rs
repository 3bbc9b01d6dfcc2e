//! 流水线阶段处理器 - 编排层
//!
//! ## 职责
//!
//! 对外暴露三个由调度方触发的阶段，外加上传登记：
//!
//! 1. **Register**：登记新上传的 PDF，创建文档实体并写入空的中间结果
//! 2. **Prepare**：把源 PDF 光栅化为逐页图片
//! 3. **Extract**：单页提取，委托 `PageFlow`
//! 4. **Consolidate**：校验中间结果、写出最终结果、推进文档状态
//!
//! 同样的输入重复调用同一个阶段是安全的。阶段级重试由调度方负责，这里不做。

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, StageError};
use crate::infrastructure::{
    ArtifactLocation, DocumentStore, ModelEndpoint, ObjectStore, PageRasterizer,
};
use crate::models::{
    ConsolidatePayload, ConsolidationSummary, DocumentJob, DocumentRecord, DocumentResult,
    DocumentStatus, DocumentUpdate, FieldCatalog, PageOutcome, PageTask, PreparedDocument,
};
use crate::services::{FieldValidator, IntermediateStore};
use crate::workflow::{PageCtx, PageFlow};

/// 调度方可触发的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Extract,
    Consolidate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Extract => "extract",
            Stage::Consolidate => "consolidate",
        }
    }
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prepare" => Ok(Stage::Prepare),
            "extract" => Ok(Stage::Extract),
            "consolidate" => Ok(Stage::Consolidate),
            other => Err(StageError::UnknownStage(other.to_string()).into()),
        }
    }
}

/// 流水线编排器
pub struct PipelineOrchestrator {
    store: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
    rasterizer: Arc<dyn PageRasterizer>,
    intermediate: Arc<IntermediateStore>,
    page_flow: PageFlow,
    validator: FieldValidator,
    async_bucket: String,
    output_bucket: String,
    image_format: String,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
        rasterizer: Arc<dyn PageRasterizer>,
        endpoint: Arc<dyn ModelEndpoint>,
    ) -> Self {
        let catalog = FieldCatalog::standard();
        let intermediate = Arc::new(IntermediateStore::new(
            store.clone(),
            &config.output_bucket,
            catalog.clone(),
        ));
        let page_flow = PageFlow::new(
            config,
            endpoint,
            store.clone(),
            intermediate.clone(),
            catalog.clone(),
        );

        Self {
            store,
            documents,
            rasterizer,
            intermediate,
            page_flow,
            validator: FieldValidator::new(catalog),
            async_bucket: config.async_bucket.clone(),
            output_bucket: config.output_bucket.clone(),
            image_format: config.image_format.clone(),
        }
    }

    /// 登记一个新上传的源文件
    ///
    /// 不是 PDF 时返回 `None`；否则文档依次经过 `Uploaded` → `In progress`，并返回 Prepare 的输入。
    pub async fn register_upload(&self, source: &ArtifactLocation) -> AppResult<Option<DocumentJob>> {
        if !source.key.to_ascii_lowercase().ends_with(".pdf") {
            info!("⏭️ {} 不是 PDF，忽略", source);
            return Ok(None);
        }

        let file_id = uuid::Uuid::new_v4().to_string();
        let filename = source.file_name().to_string();

        self.documents
            .create(DocumentRecord::new(
                &file_id,
                &filename,
                source.to_string(),
                DocumentStatus::Uploaded,
            ))
            .await?;
        self.intermediate.seed(&filename).await?;
        self.documents
            .update(&file_id, DocumentUpdate::status(DocumentStatus::InProgress))
            .await?;

        info!("📥 已登记文档 {} ({})", filename, file_id);
        Ok(Some(DocumentJob {
            file_id,
            filename,
            source_uri: source.to_string(),
            output_prefix: "images".to_string(),
            format: self.image_format.clone(),
        }))
    }

    /// Prepare：逐页光栅化
    pub async fn prepare(&self, job: &DocumentJob) -> AppResult<PreparedDocument> {
        let source: ArtifactLocation = job
            .source_uri
            .parse()
            .map_err(|e: AppError| AppError::invalid_payload(Stage::Prepare.as_str(), e))?;
        let output = ArtifactLocation::new(
            &self.async_bucket,
            format!("{}/{}", job.output_prefix.trim_end_matches('/'), job.filename),
        );

        let images = self.rasterizer.rasterize(&source, &output, &job.format).await?;
        if images.is_empty() {
            return Err(StageError::Rasterize {
                source_uri: job.source_uri.clone(),
                reason: "没有生成任何页面".to_string(),
            }
            .into());
        }

        info!("🖼️ {} 光栅化完成: {} 页", job.filename, images.len());
        Ok(PreparedDocument {
            file_id: job.file_id.clone(),
            filename: job.filename.clone(),
            source_uri: job.source_uri.clone(),
            pages: images
                .into_iter()
                .map(|image| PageTask {
                    file_id: job.file_id.clone(),
                    filename: job.filename.clone(),
                    page: image.page,
                    image_uri: image.location.to_string(),
                })
                .collect(),
        })
    }

    /// Extract：处理一页
    pub async fn extract(&self, task: &PageTask) -> AppResult<PageOutcome> {
        let ctx = PageCtx::from(task);
        self.page_flow.run(task, &ctx).await.map_err(|e| {
            error!("{} ❌ 提取失败: {}", ctx, e);
            e
        })
    }

    /// Consolidate：校验并写出最终结果，推进文档状态
    pub async fn consolidate(&self, payload: &ConsolidatePayload) -> AppResult<ConsolidationSummary> {
        let source: ArtifactLocation = payload
            .source_uri
            .parse()
            .map_err(|e: AppError| AppError::invalid_payload(Stage::Consolidate.as_str(), e))?;

        let intermediate = self.intermediate.load(&payload.filename).await?;
        let accuracy = intermediate.accuracy();
        let result = DocumentResult {
            fields: self.validator.validate(intermediate.fields),
            accuracy,
        };

        let location = self.result_location(&source);
        self.store.put_json(&location, &result.to_artifact()).await?;

        let missing_pages = payload.missing_pages();
        let status = if missing_pages.is_empty() {
            DocumentStatus::Processed
        } else {
            warn!(
                "⚠️ {} 有 {} 页未完成: {:?}",
                payload.filename,
                missing_pages.len(),
                missing_pages
            );
            DocumentStatus::PartiallyProcessed
        };

        self.documents
            .update(
                &payload.file_id,
                DocumentUpdate::status(status).with_result_uri(location.to_string()),
            )
            .await?;

        let summary = ConsolidationSummary {
            file_id: payload.file_id.clone(),
            status,
            result_uri: location.to_string(),
            field_count: result.fields.len(),
            invalid_count: result.invalid_count(),
            accuracy,
            missing_pages,
        };
        info!(
            "✅ {} 汇总完成: {} 个字段 ({} 个未通过校验), accuracy={:.1}, 状态 {}",
            payload.filename, summary.field_count, summary.invalid_count, accuracy, status
        );
        Ok(summary)
    }

    /// 调度方入口：JSON 进，JSON 出
    pub async fn invoke(&self, stage: Stage, payload: Value) -> AppResult<Value> {
        match stage {
            Stage::Prepare => {
                let job: DocumentJob = decode(stage, payload)?;
                encode(&self.prepare(&job).await?)
            }
            Stage::Extract => {
                let task: PageTask = decode(stage, payload)?;
                encode(&self.extract(&task).await?)
            }
            Stage::Consolidate => {
                let payload: ConsolidatePayload = decode(stage, payload)?;
                encode(&self.consolidate(&payload).await?)
            }
        }
    }

    /// `OUTPUT_BUCKET/<源文件 key 去掉扩展名>.json`
    fn result_location(&self, source: &ArtifactLocation) -> ArtifactLocation {
        let key = Path::new(&source.key).with_extension("json");
        ArtifactLocation::new(&self.output_bucket, key.to_string_lossy().into_owned())
    }
}

fn decode<T: DeserializeOwned>(stage: Stage, payload: Value) -> AppResult<T> {
    serde_json::from_value(payload).map_err(|e| AppError::invalid_payload(stage.as_str(), e))
}

fn encode<T: Serialize>(value: &T) -> AppResult<Value> {
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_stage_names() {
        for stage in [Stage::Prepare, Stage::Extract, Stage::Consolidate] {
            assert_eq!(assert_ok!(stage.as_str().parse::<Stage>()), stage);
        }
        assert_eq!(assert_ok!(" Extract ".parse::<Stage>()), Stage::Extract);
        let err = assert_err!("upload".parse::<Stage>());
        assert!(matches!(err, AppError::Stage(StageError::UnknownStage(_))));
    }
}
