//! 模型服务端点 - 基础设施层
//!
//! ## 技术栈
//! - 同步调用使用 `async-openai`，兼容任何 OpenAI API 风格的服务
//! - 异步调用使用 `reqwest`：请求体已提前写入存储，这里只告知输入 / 输出 / 失败位置
//!
//! 端点只负责"发出请求、带回结果"，不关心提示词和结果解析。

use async_openai::{
    config::OpenAIConfig, types::chat::CreateChatCompletionRequest, Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, InferenceError};
use crate::models::{ModelResponse, TokenUsage};

/// 异步调用参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncInvocation {
    pub inference_id: String,
    pub input_location: String,
    pub output_location: String,
    pub failure_location: String,
    pub content_type: String,
    pub invocation_timeout_seconds: u64,
    pub request_ttl_seconds: u64,
}

/// 异步调用的回执；服务端可以改写输出 / 失败位置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncInvocationAck {
    #[serde(default)]
    pub output_location: Option<String>,
    #[serde(default)]
    pub failure_location: Option<String>,
}

/// 模型服务端点能力
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// 用于日志和错误信息的端点名
    fn name(&self) -> &str;

    /// 同步调用，阻塞到拿到完整响应
    async fn invoke(&self, request: CreateChatCompletionRequest) -> AppResult<ModelResponse>;

    /// 异步调用，立即返回
    async fn invoke_async(&self, invocation: AsyncInvocation) -> AppResult<AsyncInvocationAck>;
}

/// OpenAI 兼容端点
pub struct OpenAiEndpoint {
    client: Client<OpenAIConfig>,
    http: reqwest::Client,
    name: String,
    api_key: String,
    async_url: Option<String>,
}

impl OpenAiEndpoint {
    /// 创建端点；异步地址可以不配置，只有真正发起异步调用时才报错
    pub fn new(config: &Config) -> AppResult<Self> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.model_api_key)
            .with_api_base(&config.model_endpoint_url);
        let client = Client::with_config(openai_config);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            http,
            name: config.model_name.clone(),
            api_key: config.model_api_key.clone(),
            async_url: config.async_endpoint().ok().map(str::to_string),
        })
    }
}

#[async_trait]
impl ModelEndpoint for OpenAiEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: CreateChatCompletionRequest) -> AppResult<ModelResponse> {
        debug!("调用模型端点 {}", self.name);

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("模型端点调用失败: {}", e);
            AppError::endpoint_failed(&self.name, e)
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| InferenceError::EmptyResponse {
                endpoint: self.name.clone(),
            })?;

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ModelResponse { content, usage })
    }

    async fn invoke_async(&self, invocation: AsyncInvocation) -> AppResult<AsyncInvocationAck> {
        let url = self
            .async_url
            .as_deref()
            .ok_or_else(|| AppError::missing_config("MODEL_ASYNC_ENDPOINT_URL"))?;

        debug!(
            "异步调用 {}: input={} output={}",
            url, invocation.input_location, invocation.output_location
        );

        let mut request = self.http.post(url).json(&invocation);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::endpoint_failed(
                url,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let ack: AsyncInvocationAck = response.json().await?;
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invocation_wire_shape() {
        let invocation = AsyncInvocation {
            inference_id: "job-1".into(),
            input_location: "s3://async/input/job-1/input.json".into(),
            output_location: "s3://async/output/job-1/output.json".into(),
            failure_location: "s3://async/error/job-1/error.json".into(),
            content_type: "application/json".into(),
            invocation_timeout_seconds: 3600,
            request_ttl_seconds: 21600,
        };
        let value = serde_json::to_value(&invocation).unwrap();
        assert_eq!(value["inferenceId"], json!("job-1"));
        assert_eq!(value["invocationTimeoutSeconds"], json!(3600));
        assert_eq!(value["requestTtlSeconds"], json!(21600));
    }

    #[test]
    fn test_ack_without_output() {
        let ack: AsyncInvocationAck = serde_json::from_value(json!({})).unwrap();
        assert!(ack.output_location.is_none());
    }

    #[tokio::test]
    async fn test_async_invoke_requires_url() {
        let endpoint = OpenAiEndpoint::new(&Config::default()).unwrap();
        let err = endpoint
            .invoke_async(AsyncInvocation {
                inference_id: "job-2".into(),
                input_location: String::new(),
                output_location: String::new(),
                failure_location: String::new(),
                content_type: "application/json".into(),
                invocation_timeout_seconds: 1,
                request_ttl_seconds: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(!err.is_retryable());
    }

    /// 连通性测试，需要真实端点：
    /// ```bash
    /// MODEL_ENDPOINT_URL=... MODEL_API_KEY=... cargo test test_sync_invoke_live -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_sync_invoke_live() {
        use async_openai::types::chat::{
            ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
            CreateChatCompletionRequestArgs,
        };

        let _ = tracing_subscriber::fmt::try_init();
        let config = Config::from_env();
        let endpoint = OpenAiEndpoint::new(&config).unwrap();

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content("Reply with the word OK.")
            .build()
            .unwrap();
        let request = CreateChatCompletionRequestArgs::default()
            .model(&config.model_name)
            .messages(vec![ChatCompletionRequestMessage::User(user)])
            .max_tokens(16u32)
            .build()
            .unwrap();

        let response = endpoint.invoke(request).await.unwrap();
        println!("模型响应: {}", response.content);
        assert!(!response.content.is_empty());
    }
}
