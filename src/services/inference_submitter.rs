//! 推理提交 - 业务能力层
//!
//! 把单页提取请求发给模型端点：
//! - 同步：阻塞到拿到响应
//! - 异步：先把请求体写入存储，再调用端点，返回任务句柄
//!
//! 所有请求在发出前都会做 token 预检，超限直接报错。

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageDetail, ImageUrl,
};
use base64::Engine;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{Config, PageImageMode};
use crate::error::{AppError, AppResult, InferenceError};
use crate::infrastructure::rasterizer::image_format;
use crate::infrastructure::{ArtifactLocation, AsyncInvocation, ModelEndpoint, ObjectStore};
use crate::models::{AsyncJobHandle, ExtractionRequest, ModelResponse};
use crate::services::token_budget::TokenBudget;

/// 推理提交器
///
/// 职责：
/// - 构建请求并做 token 预检
/// - 同步 / 异步提交
/// - 不解析模型输出，不关心流水线阶段
pub struct InferenceSubmitter {
    endpoint: Arc<dyn ModelEndpoint>,
    store: Arc<dyn ObjectStore>,
    async_bucket: String,
    model_name: String,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    token_ceiling: usize,
    invocation_timeout_secs: u64,
    request_ttl_secs: u64,
    image_mode: PageImageMode,
}

impl InferenceSubmitter {
    pub fn new(
        config: &Config,
        endpoint: Arc<dyn ModelEndpoint>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            endpoint,
            store,
            async_bucket: config.async_bucket.clone(),
            model_name: config.model_name.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            token_ceiling: config.token_ceiling,
            invocation_timeout_secs: config.invocation_timeout_secs,
            request_ttl_secs: config.request_ttl_secs,
            image_mode: config.page_image_mode,
        }
    }

    /// 用配置中的采样参数创建单页请求
    pub fn extraction_request(&self, page_image_ref: String, prompt: String) -> ExtractionRequest {
        ExtractionRequest {
            page_image_ref,
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// 页面图片传给模型的地址：预签名 URL，或 base64 data URL
    pub async fn page_image_ref(&self, location: &ArtifactLocation) -> AppResult<String> {
        match self.image_mode {
            PageImageMode::Presigned => Ok(self.store.presign(location)),
            PageImageMode::Inline => {
                let bytes = self.store.get(location).await?.ok_or_else(|| {
                    AppError::read_failed(location, "页面图片不存在")
                })?;
                let ext = location.key.rsplit('.').next().unwrap_or_default();
                let mime = image_format(ext).map(|f| f.2).unwrap_or("image/jpeg");
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                Ok(format!("data:{};base64,{}", mime, encoded))
            }
        }
    }

    /// 同步提交
    pub async fn submit_sync(&self, request: &ExtractionRequest) -> AppResult<ModelResponse> {
        let chat = self.build_chat_request(request)?;
        self.endpoint.invoke(chat).await
    }

    /// 异步提交
    ///
    /// 请求体总是先写入 `input/<jobId>/input.json`，之后才调用端点；
    /// 同一个 job id 重复提交是安全的。
    pub async fn submit_async(
        &self,
        request: &ExtractionRequest,
        job_id: Option<String>,
    ) -> AppResult<AsyncJobHandle> {
        let chat = self.build_chat_request(request)?;
        self.submit_chat_async(chat, job_id).await
    }

    /// 文本问答（同步）
    pub async fn ask_text(&self, context: &str, question: &str) -> AppResult<ModelResponse> {
        let chat = self.build_text_request(context, question)?;
        self.endpoint.invoke(chat).await
    }

    /// 文本问答（异步）
    pub async fn ask_text_async(
        &self,
        context: &str,
        question: &str,
        job_id: Option<String>,
    ) -> AppResult<AsyncJobHandle> {
        let chat = self.build_text_request(context, question)?;
        self.submit_chat_async(chat, job_id).await
    }

    async fn submit_chat_async(
        &self,
        chat: CreateChatCompletionRequest,
        job_id: Option<String>,
    ) -> AppResult<AsyncJobHandle> {
        let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let input = ArtifactLocation::new(&self.async_bucket, format!("input/{}/input.json", job_id));
        let default_output =
            ArtifactLocation::new(&self.async_bucket, format!("output/{}/output.json", job_id));
        let default_failure =
            ArtifactLocation::new(&self.async_bucket, format!("error/{}/error.json", job_id));

        let payload = serde_json::to_value(&chat)?;
        self.store.put_json(&input, &payload).await?;
        debug!("任务 {} 请求体已写入 {}", job_id, input);

        let ack = self
            .endpoint
            .invoke_async(AsyncInvocation {
                inference_id: job_id.clone(),
                input_location: input.to_string(),
                output_location: default_output.to_string(),
                failure_location: default_failure.to_string(),
                content_type: "application/json".to_string(),
                invocation_timeout_seconds: self.invocation_timeout_secs,
                request_ttl_seconds: self.request_ttl_secs,
            })
            .await?;

        let output_location = ack.output_location.ok_or_else(|| {
            InferenceError::MissingOutputLocation {
                endpoint: self.endpoint.name().to_string(),
            }
        })?;
        let failure_location = ack
            .failure_location
            .unwrap_or_else(|| default_failure.to_string());

        info!("🚀 异步任务 {} 已提交", job_id);
        Ok(AsyncJobHandle {
            job_id,
            output_location,
            failure_location,
            input_location: input.to_string(),
        })
    }

    /// 提取请求：文本 + 页面图片
    fn build_chat_request(&self, request: &ExtractionRequest) -> AppResult<CreateChatCompletionRequest> {
        TokenBudget::new(self.token_ceiling, request.max_tokens as usize)
            .check(&request.prompt, "提取提示词")?;

        let parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: request.prompt.clone(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: request.page_image_ref.clone(),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()?;

        self.finish_request(
            ChatCompletionRequestMessage::User(user_msg),
            request.temperature,
            request.max_tokens,
        )
    }

    /// 文本问答请求：`Context: …\n\nQuestion: …`
    fn build_text_request(&self, context: &str, question: &str) -> AppResult<CreateChatCompletionRequest> {
        TokenBudget::new(self.token_ceiling, question.chars().count()).check(context, "问答上下文")?;

        let text = format!("Context: {}\n\nQuestion: {}", context, question);
        TokenBudget::new(self.token_ceiling, self.max_tokens as usize).check(&text, "问答请求")?;

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText { text },
                ),
            ]))
            .build()?;

        self.finish_request(
            ChatCompletionRequestMessage::User(user_msg),
            self.temperature,
            self.max_tokens,
        )
    }

    fn finish_request(
        &self,
        message: ChatCompletionRequestMessage,
        temperature: f32,
        max_tokens: u32,
    ) -> AppResult<CreateChatCompletionRequest> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![message])
            .temperature(temperature)
            .max_tokens(max_tokens)
            .top_p(self.top_p)
            .stream(false)
            .build()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{AsyncInvocationAck, MemoryObjectStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_test::assert_err;

    /// 记录调用、按预设回执应答的端点
    struct ScriptedEndpoint {
        ack: AsyncInvocationAck,
        store: Arc<MemoryObjectStore>,
        seen_input_before_invoke: Mutex<Vec<bool>>,
        invocations: Mutex<Vec<AsyncInvocation>>,
    }

    impl ScriptedEndpoint {
        fn new(store: Arc<MemoryObjectStore>, ack: AsyncInvocationAck) -> Self {
            Self {
                ack,
                store,
                seen_input_before_invoke: Mutex::new(Vec::new()),
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelEndpoint for ScriptedEndpoint {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn invoke(&self, request: CreateChatCompletionRequest) -> AppResult<ModelResponse> {
            let body = serde_json::to_value(&request)?;
            Ok(ModelResponse {
                content: body["messages"][0]["content"][0]["text"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                usage: None,
            })
        }

        async fn invoke_async(&self, invocation: AsyncInvocation) -> AppResult<AsyncInvocationAck> {
            let input: ArtifactLocation = invocation.input_location.parse()?;
            let present = self.store.contains(&input).await;
            self.seen_input_before_invoke.lock().unwrap().push(present);
            self.invocations.lock().unwrap().push(invocation);
            Ok(self.ack.clone())
        }
    }

    fn setup(ack: AsyncInvocationAck) -> (InferenceSubmitter, Arc<ScriptedEndpoint>, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(store.clone(), ack));
        let submitter = InferenceSubmitter::new(&Config::default(), endpoint.clone(), store.clone());
        (submitter, endpoint, store)
    }

    fn ok_ack() -> AsyncInvocationAck {
        AsyncInvocationAck {
            output_location: Some("s3://async/output/job-7/output.json".into()),
            failure_location: None,
        }
    }

    #[tokio::test]
    async fn test_async_writes_input_before_invoking() {
        let (submitter, endpoint, store) = setup(ok_ack());
        let request = submitter.extraction_request("https://img/page-1.jpg".into(), "extract".into());

        let handle = submitter
            .submit_async(&request, Some("job-7".into()))
            .await
            .unwrap();

        assert_eq!(handle.job_id, "job-7");
        assert_eq!(handle.input_location, "s3://async/input/job-7/input.json");
        assert_eq!(handle.failure_location, "s3://async/error/job-7/error.json");
        assert_eq!(*endpoint.seen_input_before_invoke.lock().unwrap(), vec![true]);

        let payload = store
            .get_json(&handle.input_location.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload["stream"], json!(false));
        assert_eq!(payload["max_tokens"], json!(1024));
        assert_eq!(payload["messages"][0]["content"][0]["type"], json!("text"));
        assert_eq!(
            payload["messages"][0]["content"][1]["image_url"]["url"],
            json!("https://img/page-1.jpg")
        );

        let invocation = endpoint.invocations.lock().unwrap()[0].clone();
        assert_eq!(invocation.invocation_timeout_seconds, 3600);
        assert_eq!(invocation.request_ttl_seconds, 21600);
    }

    #[tokio::test]
    async fn test_missing_output_location_is_fatal() {
        let (submitter, _, _) = setup(AsyncInvocationAck::default());
        let request = submitter.extraction_request("u".into(), "p".into());
        let err = submitter.submit_async(&request, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Inference(InferenceError::MissingOutputLocation { .. })
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_generated_job_ids_are_unique() {
        let (submitter, _, _) = setup(ok_ack());
        let request = submitter.extraction_request("u".into(), "p".into());
        let a = submitter.submit_async(&request, None).await.unwrap();
        let b = submitter.submit_async(&request, None).await.unwrap();
        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn test_oversized_prompt_rejected_before_any_io() {
        let (submitter, endpoint, store) = setup(ok_ack());
        let request = submitter.extraction_request("u".into(), "word ".repeat(10_000));

        let err = submitter.submit_async(&request, Some("big".into())).await.unwrap_err();
        assert!(matches!(err, AppError::TokenBudget(_)));
        assert!(endpoint.invocations.lock().unwrap().is_empty());
        assert!(store.keys("async", "input/").await.is_empty());
    }

    #[tokio::test]
    async fn test_ask_text_formats_question() {
        let (submitter, _, _) = setup(ok_ack());
        let response = submitter
            .ask_text("Patient: Jane Doe", "What is the patient's name?")
            .await
            .unwrap();
        assert_eq!(
            response.content,
            "Context: Patient: Jane Doe\n\nQuestion: What is the patient's name?"
        );

        assert_err!(submitter.ask_text(&"word ".repeat(10_000), "?").await);
    }

    #[tokio::test]
    async fn test_inline_image_ref() {
        let store = Arc::new(MemoryObjectStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(store.clone(), ok_ack()));
        let config = Config {
            page_image_mode: PageImageMode::Inline,
            ..Config::default()
        };
        let submitter = InferenceSubmitter::new(&config, endpoint, store.clone());

        let loc = ArtifactLocation::new("async", "images/a.pdf/page-1.png");
        store.put(&loc, vec![1, 2, 3], "image/png").await.unwrap();
        let url = submitter.page_image_ref(&loc).await.unwrap();
        assert_eq!(url, "data:image/png;base64,AQID");
    }
}
