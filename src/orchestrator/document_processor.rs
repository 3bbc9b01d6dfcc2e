//! 单个文档处理器 - 编排层
//!
//! ## 职责
//!
//! 在本地运行时扮演调度方，把一个源 PDF 依次送过各个阶段：
//!
//! 1. **登记**：创建文档实体
//! 2. **Prepare**：逐页光栅化
//! 3. **Extract**：按页并发提取，Semaphore 限制同时进行的页数
//! 4. **Consolidate**：等所有页都有结局后汇总
//!
//! 单页失败不会中断文档：可重试的错误（如轮询超时）重新提交一次，
//! 仍然失败的页不出现在结局列表里，文档最终标记为部分完成。

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::infrastructure::ArtifactLocation;
use crate::models::{ConsolidatePayload, ConsolidationSummary, PageOutcome, PageTask};
use crate::orchestrator::pipeline::PipelineOrchestrator;

/// 单个文档的处理结局
#[derive(Debug)]
pub enum DocumentRun {
    /// 已汇总（全部或部分页面完成）
    Consolidated(ConsolidationSummary),
    /// 不是 PDF，未处理
    Skipped,
}

/// 处理单个文档
///
/// # 参数
/// - `orchestrator`: 流水线编排器
/// - `source`: 源 PDF 地址
/// - `doc_index`: 文档索引（用于日志）
/// - `max_concurrent_pages`: 同时提取的页数上限
pub async fn process_document(
    orchestrator: Arc<PipelineOrchestrator>,
    source: ArtifactLocation,
    doc_index: usize,
    max_concurrent_pages: usize,
) -> Result<DocumentRun> {
    let Some(job) = orchestrator.register_upload(&source).await? else {
        return Ok(DocumentRun::Skipped);
    };
    info!("[文档 {}] 📄 {} ({})", doc_index, job.filename, job.file_id);

    let prepared = orchestrator
        .prepare(&job)
        .await
        .with_context(|| format!("文档 {} 光栅化失败", job.filename))?;

    // ========== 按页并发提取 ==========
    let semaphore = Arc::new(Semaphore::new(max_concurrent_pages.max(1)));
    let mut handles = Vec::with_capacity(prepared.pages.len());

    for task in prepared.pages.iter().cloned() {
        let permit = semaphore.clone().acquire_owned().await?;
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let result = extract_page(&orchestrator, &task, doc_index).await;
            (task.page, result)
        }));
    }

    let mut outcomes: Vec<PageOutcome> = Vec::with_capacity(handles.len());
    for joined in join_all(handles).await {
        match joined {
            Ok((_, Ok(outcome))) => outcomes.push(outcome),
            Ok((page, Err(e))) => warn!(
                "[文档 {}] ⚠️ 第 {} 页放弃: {}",
                doc_index,
                page,
                e.to_payload()
            ),
            Err(e) => error!("[文档 {}] 页面任务执行失败: {}", doc_index, e),
        }
    }

    log_extract_complete(doc_index, outcomes.len(), prepared.pages.len());

    // ========== 汇总 ==========
    let payload = ConsolidatePayload::from_prepared(&prepared, outcomes);
    let summary = orchestrator
        .consolidate(&payload)
        .await
        .with_context(|| format!("文档 {} 汇总失败", job.filename))?;

    Ok(DocumentRun::Consolidated(summary))
}

/// 提取一页；可重试的错误重新提交一次
async fn extract_page(
    orchestrator: &PipelineOrchestrator,
    task: &PageTask,
    doc_index: usize,
) -> AppResult<PageOutcome> {
    match orchestrator.extract(task).await {
        Err(e) if e.is_retryable() => {
            warn!(
                "[文档 {}] 🔄 第 {} 页重新提交: {}",
                doc_index,
                task.page,
                e.to_payload()
            );
            orchestrator.extract(task).await
        }
        result => result,
    }
}

fn log_extract_complete(doc_index: usize, done: usize, total: usize) {
    info!("[文档 {}] ✓ 页面提取完成: {}/{}", doc_index, done, total);
}
