//! 批量文档处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是本地运行的入口，负责批量文档的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：写日志文件头、校验配置、创建存储 / 端点 / 光栅化器
//! 2. **批量加载**：扫描输入目录中的 PDF 并上传到输入 bucket
//! 3. **并发控制**：使用 Semaphore 限制同时处理的文档数
//! 4. **分批处理**：每批完成后再开始下一批
//! 5. **全局统计**：汇总所有文档的处理结果
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个文档的细节，委托 document_processor
//! - **资源所有者**：唯一创建基础设施实现的模块

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::infrastructure::{
    ArtifactLocation, LocalObjectStore, ObjectDocumentStore, ObjectStore, OpenAiEndpoint,
    PdftoppmRasterizer,
};
use crate::models::DocumentStatus;
use crate::orchestrator::document_processor::{self, DocumentRun};
use crate::orchestrator::pipeline::PipelineOrchestrator;
use crate::utils::logging::{
    init_log_file, log_batch_complete, log_batch_start, log_documents_loaded, log_startup,
    print_final_stats,
};

/// 应用主结构
pub struct App {
    config: Config,
    store: Arc<dyn ObjectStore>,
    orchestrator: Arc<PipelineOrchestrator>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        log_startup(
            &config.model_name,
            config.max_concurrent_documents,
            config.max_concurrent_pages,
        );

        config.validate()?;

        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&config.storage_root));
        let documents = Arc::new(ObjectDocumentStore::new(
            store.clone(),
            &config.output_bucket,
        ));
        let rasterizer = Arc::new(PdftoppmRasterizer::new(
            store.clone(),
            &config.rasterizer_binary,
            config.rasterizer_dpi,
        ));
        let endpoint = Arc::new(OpenAiEndpoint::new(&config)?);

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            &config,
            store.clone(),
            documents,
            rasterizer,
            endpoint,
        ));

        Ok(Self {
            config,
            store,
            orchestrator,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let all_documents = self.load_documents().await?;

        if all_documents.is_empty() {
            warn!("⚠️ 没有找到待处理的 PDF 文件，程序结束");
            return Ok(());
        }

        let total = all_documents.len();
        log_documents_loaded(total, self.config.max_concurrent_documents);

        let stats = self.process_all_documents(all_documents).await?;

        print_final_stats(
            stats.success,
            stats.partial,
            stats.failed,
            stats.total,
            &self.config.output_log_file,
        );

        Ok(())
    }

    /// 扫描输入目录，把 PDF 上传到输入 bucket
    async fn load_documents(&self) -> Result<Vec<ArtifactLocation>> {
        info!("📁 正在扫描待处理的文档: {}", self.config.input_folder);

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.input_folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && is_pdf(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let location = ArtifactLocation::new(&self.config.input_bucket, name);
            self.store.put(&location, bytes, "application/pdf").await?;
            sources.push(location);
        }
        Ok(sources)
    }

    /// 处理所有文档
    async fn process_all_documents(&self, all_documents: Vec<ArtifactLocation>) -> Result<ProcessingStats> {
        let batch_size = self.config.max_concurrent_documents.max(1);
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let total = all_documents.len();
        let mut stats = ProcessingStats {
            total,
            ..Default::default()
        };

        // 分批处理
        for batch_start in (0..total).step_by(batch_size) {
            let batch_end = (batch_start + batch_size).min(total);
            let batch_num = batch_start / batch_size + 1;
            let total_batches = total.div_ceil(batch_size);

            log_batch_start(batch_num, total_batches, batch_start + 1, batch_end, total);

            let batch_result = self
                .process_batch(&all_documents[batch_start..batch_end], batch_start, semaphore.clone())
                .await?;

            stats.success += batch_result.success;
            stats.partial += batch_result.partial;
            stats.failed += batch_result.failed;

            log_batch_complete(
                batch_num,
                batch_result.success + batch_result.partial,
                batch_end - batch_start,
            );
        }

        Ok(stats)
    }

    /// 处理单个批次
    async fn process_batch(
        &self,
        batch: &[ArtifactLocation],
        batch_start: usize,
        semaphore: Arc<Semaphore>,
    ) -> Result<BatchResult> {
        let mut handles = Vec::new();

        for (idx, source) in batch.iter().enumerate() {
            let doc_index = batch_start + idx + 1;
            let permit = semaphore.clone().acquire_owned().await?;
            let orchestrator = self.orchestrator.clone();
            let source = source.clone();
            let max_pages = self.config.max_concurrent_pages;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                document_processor::process_document(orchestrator, source, doc_index, max_pages)
                    .await
                    .map_err(|e| {
                        error!("[文档 {}] ❌ 处理过程中发生错误: {:#}", doc_index, e);
                        e
                    })
            });
            handles.push((doc_index, handle));
        }

        let mut result = BatchResult::default();
        for (doc_index, handle) in handles {
            match handle.await {
                Ok(Ok(DocumentRun::Consolidated(summary))) => match summary.status {
                    DocumentStatus::Processed => result.success += 1,
                    _ => result.partial += 1,
                },
                Ok(Ok(DocumentRun::Skipped)) | Ok(Err(_)) => result.failed += 1,
                Err(e) => {
                    error!("[文档 {}] 任务执行失败: {}", doc_index, e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    success: usize,
    partial: usize,
    failed: usize,
    total: usize,
}

/// 批次处理结果
#[derive(Debug, Default)]
struct BatchResult {
    success: usize,
    partial: usize,
    failed: usize,
}
