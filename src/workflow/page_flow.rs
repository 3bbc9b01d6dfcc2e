//! 单页提取流程 - 流程层
//!
//! 核心职责：定义"一页"的完整处理流程
//!
//! 流程顺序：
//! 1. 读取中间结果，计算还没有取到值的字段
//! 2. 没有待提取字段 → 记录该页并跳过推理
//! 3. 构建提示词 → 异步提交 → 轮询到终态
//! 4. 对账模型输出 → 按字段名合并进中间结果

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, StageError};
use crate::infrastructure::{ArtifactLocation, ModelEndpoint, ObjectStore};
use crate::models::{FieldCatalog, PageOutcome, PageState, PageTask};
use crate::services::{
    require_completed, InferenceReconciler, InferenceSubmitter, IntermediateStore, PromptBuilder,
    ResponseReconciler,
};
use crate::utils::logging::truncate_text;
use crate::utils::RetryPolicy;
use crate::workflow::page_ctx::PageCtx;

/// 单页提取流程
///
/// - 编排一页的提交、轮询、对账、合并
/// - 不做阶段级重试：推理失败和轮询超时原样交给调度方
/// - 解析降级不是错误，最多得到一个空字段列表
pub struct PageFlow {
    submitter: InferenceSubmitter,
    reconciler: InferenceReconciler,
    responses: ResponseReconciler,
    prompts: PromptBuilder,
    intermediate: Arc<IntermediateStore>,
    catalog: FieldCatalog,
    verbose_logging: bool,
}

impl PageFlow {
    /// 创建新的单页流程
    pub fn new(
        config: &Config,
        endpoint: Arc<dyn ModelEndpoint>,
        store: Arc<dyn ObjectStore>,
        intermediate: Arc<IntermediateStore>,
        catalog: FieldCatalog,
    ) -> Self {
        Self {
            submitter: InferenceSubmitter::new(config, endpoint, store.clone()),
            reconciler: InferenceReconciler::new(store, RetryPolicy::from_config(config)),
            responses: ResponseReconciler::new(catalog.clone()),
            prompts: PromptBuilder::new(),
            intermediate,
            catalog,
            verbose_logging: config.verbose_logging,
        }
    }

    pub async fn run(&self, task: &PageTask, ctx: &PageCtx) -> AppResult<PageOutcome> {
        let image: ArtifactLocation = task
            .image_uri
            .parse()
            .map_err(|e: AppError| AppError::invalid_payload("extract", e))?;

        // ========== 1. 计算待提取字段 ==========
        let current = self.intermediate.load(&task.filename).await?;
        let pending = current.pending(&self.catalog);

        if pending.is_empty() {
            let accuracy = current
                .pages
                .get(&task.page)
                .copied()
                .unwrap_or_else(|| current.accuracy());
            info!("{} ⏭️ 所有字段均已取到值，跳过推理", ctx);
            self.intermediate
                .mark_page(&task.filename, task.page, accuracy)
                .await?;
            return Ok(self.outcome(task, PageState::Skipped, 0, accuracy));
        }

        info!(
            "{} 🔍 待提取字段 {}/{}",
            ctx,
            pending.len(),
            self.catalog.len()
        );

        // ========== 2. 提交并轮询 ==========
        let prompt = self.prompts.build(&pending);
        let image_ref = self.submitter.page_image_ref(&image).await?;
        let request = self.submitter.extraction_request(image_ref, prompt);
        let handle = self.submitter.submit_async(&request, None).await?;
        debug!("{} 任务 {} 输出位置 {}", ctx, handle.job_id, handle.output_location);

        let report = self.reconciler.poll_until_terminal(&handle).await?;
        let response = require_completed(report)?;

        if response.content.trim().is_empty() {
            warn!("{} ⚠️ 模型返回内容为空", ctx);
            return Err(StageError::EmptyInference { page: task.page }.into());
        }
        if self.verbose_logging {
            debug!("{} 模型输出: {}", ctx, truncate_text(&response.content, 500));
        }

        // ========== 3. 对账并合并 ==========
        let extraction = self.responses.reconcile(&response.content);
        if extraction.fields.is_empty() {
            warn!("{} ⚠️ 未能从模型输出中解析出字段", ctx);
        }

        let merged = self
            .intermediate
            .merge_page(&task.filename, task.page, &extraction.fields, extraction.accuracy)
            .await?;

        info!(
            "{} ✓ 提取 {} 个字段 (accuracy={})，文档累计 {} 个",
            ctx,
            extraction.fields.len(),
            extraction.accuracy,
            merged.fields.len()
        );

        Ok(self.outcome(
            task,
            PageState::Extracted,
            extraction.fields.len(),
            extraction.accuracy,
        ))
    }

    fn outcome(&self, task: &PageTask, state: PageState, field_count: usize, accuracy: f64) -> PageOutcome {
        PageOutcome {
            file_id: task.file_id.clone(),
            filename: task.filename.clone(),
            page: task.page,
            state,
            result_key: self.intermediate.location(&task.filename).to_string(),
            field_count,
            accuracy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::infrastructure::{AsyncInvocation, AsyncInvocationAck, MemoryObjectStore};
    use crate::models::ModelResponse;
    use async_openai::types::chat::CreateChatCompletionRequest;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Output(String),
        Failure(String),
    }

    /// 每次异步调用按脚本把输出或失败产物写进存储
    struct ScriptedEndpoint {
        store: Arc<MemoryObjectStore>,
        replies: Mutex<VecDeque<Reply>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedEndpoint {
        fn new(store: Arc<MemoryObjectStore>, replies: Vec<Reply>) -> Self {
            Self {
                store,
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelEndpoint for ScriptedEndpoint {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, _request: CreateChatCompletionRequest) -> AppResult<ModelResponse> {
            unreachable!("流程只使用异步调用")
        }

        async fn invoke_async(&self, invocation: AsyncInvocation) -> AppResult<AsyncInvocationAck> {
            let input: ArtifactLocation = invocation.input_location.parse()?;
            let body = self.store.get_json(&input).await?.unwrap_or_default();
            let prompt = body["messages"][0]["content"][0]["text"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            self.prompts.lock().unwrap().push(prompt);

            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Reply::Output(content)) => {
                    let output: ArtifactLocation = invocation.output_location.parse()?;
                    self.store
                        .put_json(&output, &json!({"choices": [{"message": {"content": content}}]}))
                        .await?;
                }
                Some(Reply::Failure(body)) => {
                    let failure: ArtifactLocation = invocation.failure_location.parse()?;
                    self.store
                        .put(&failure, body.into_bytes(), "application/json")
                        .await?;
                }
                None => {}
            }
            Ok(AsyncInvocationAck {
                output_location: Some(invocation.output_location),
                failure_location: Some(invocation.failure_location),
            })
        }
    }

    fn config() -> Config {
        Config {
            poll_max_retries: 3,
            poll_interval_ms: 1,
            ..Config::default()
        }
    }

    fn setup(replies: Vec<Reply>) -> (PageFlow, Arc<ScriptedEndpoint>, Arc<IntermediateStore>) {
        let config = config();
        let store = Arc::new(MemoryObjectStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(store.clone(), replies));
        let catalog = FieldCatalog::standard();
        let intermediate = Arc::new(IntermediateStore::new(
            store.clone(),
            &config.output_bucket,
            catalog.clone(),
        ));
        let flow = PageFlow::new(&config, endpoint.clone(), store, intermediate.clone(), catalog);
        (flow, endpoint, intermediate)
    }

    fn task(page: u32) -> PageTask {
        PageTask {
            file_id: "doc-1".into(),
            filename: "fax.pdf".into(),
            page,
            image_uri: format!("s3://async/images/fax.pdf/page-{}.jpg", page),
        }
    }

    fn fields_json(pairs: &[(&str, &str)]) -> String {
        let fields: Vec<_> = pairs
            .iter()
            .map(|(n, v)| json!({"fieldName": n, "value": v}))
            .collect();
        json!({"result": {"fields": fields}, "accuracy": 85}).to_string()
    }

    #[tokio::test]
    async fn test_extracts_and_merges_page() {
        let reply = format!("```json\n{}\n```", fields_json(&[("Full Name", "Doe, Jane"), ("Gender", "F")]));
        let (flow, _, intermediate) = setup(vec![Reply::Output(reply)]);
        let t = task(1);

        let outcome = flow.run(&t, &PageCtx::from(&t)).await.unwrap();
        assert_eq!(outcome.state, PageState::Extracted);
        assert_eq!(outcome.field_count, 2);
        assert_eq!(outcome.accuracy, 85.0);
        assert_eq!(outcome.result_key, "s3://output/text/fax.pdf.json");

        let stored = intermediate.load("fax.pdf").await.unwrap();
        assert_eq!(stored.fields.len(), 2);
        assert_eq!(stored.pages.get(&1), Some(&85.0));
    }

    #[tokio::test]
    async fn test_second_page_requests_only_pending_fields() {
        let (flow, endpoint, _) = setup(vec![
            Reply::Output(fields_json(&[("Full Name", "Doe, Jane")])),
            Reply::Output(fields_json(&[("Full Name", "Someone Else"), ("Gender", "F")])),
        ]);

        let (first, second) = (task(1), task(2));
        flow.run(&first, &PageCtx::from(&first)).await.unwrap();
        flow.run(&second, &PageCtx::from(&second)).await.unwrap();

        let prompts = endpoint.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("- fieldName: Full Name"));
        assert!(!prompts[1].contains("- fieldName: Full Name"));
        assert!(prompts[1].contains("- fieldName: Gender"));
    }

    #[tokio::test]
    async fn test_job_failure_surfaces_as_stage_failure() {
        let (flow, _, intermediate) = setup(vec![Reply::Failure("{\"error\":\"boom\"}".into())]);
        let t = task(1);

        let err = flow.run(&t, &PageCtx::from(&t)).await.unwrap_err();
        assert!(matches!(err, AppError::Inference(InferenceError::JobFailed { .. })));
        assert!(!err.is_retryable());
        assert!(intermediate.load("fax.pdf").await.unwrap().pages.is_empty());
    }

    #[tokio::test]
    async fn test_poll_timeout_is_retryable() {
        let (flow, _, _) = setup(vec![]);
        let t = task(1);

        let err = flow.run(&t, &PageCtx::from(&t)).await.unwrap_err();
        assert!(matches!(err, AppError::Inference(InferenceError::PollTimeout { retries: 3, .. })));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_garbage_output_is_not_an_error() {
        let (flow, _, _) = setup(vec![Reply::Output("I could not read this fax.".into())]);
        let t = task(1);

        let outcome = flow.run(&t, &PageCtx::from(&t)).await.unwrap();
        assert_eq!(outcome.state, PageState::Extracted);
        assert_eq!(outcome.field_count, 0);
        assert_eq!(outcome.accuracy, 0.0);
    }

    #[tokio::test]
    async fn test_bad_image_uri_is_invalid_payload() {
        let (flow, _, _) = setup(vec![]);
        let mut t = task(1);
        t.image_uri = "page-1.jpg".into();

        let err = flow.run(&t, &PageCtx::from(&t)).await.unwrap_err();
        assert!(matches!(err, AppError::Stage(StageError::InvalidPayload { .. })));
    }
}
