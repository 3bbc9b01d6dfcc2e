//! 推理请求、异步任务句柄与任务状态

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单页提取请求
///
/// 由编排层按页创建，提交器消费一次，不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    /// 页面图片地址（预签名 URL 或 data URL）
    pub page_image_ref: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 异步任务句柄
///
/// 提交时生成，持有到对账结束；之后只读。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncJobHandle {
    pub job_id: String,
    pub output_location: String,
    pub failure_location: String,
    pub input_location: String,
}

/// 任务状态（每次轮询时由产物是否存在推导，不落库）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Token 使用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// 模型响应：文本内容 + 可选的 token 用量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    /// 从异步输出产物中读取内容
    ///
    /// 兼容 `choices[0].message.content` 与顶层 `content` 两种写法，都没有时内容为空串。
    pub fn from_output_body(body: &Value) -> Self {
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .or_else(|| body.get("content").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let usage = body
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok());
        Self { content, usage }
    }
}

/// 单次状态检查的结果
#[derive(Debug, Clone, PartialEq)]
pub enum StatusCheck {
    /// 输出产物已存在
    Completed(ModelResponse),
    /// 失败产物已存在，携带失败内容
    Failed(String),
    /// 两者都还没有
    InProgress,
}

impl StatusCheck {
    pub fn status(&self) -> JobStatus {
        match self {
            StatusCheck::Completed(_) => JobStatus::Completed,
            StatusCheck::Failed(_) => JobStatus::Failed,
            StatusCheck::InProgress => JobStatus::InProgress,
        }
    }
}

/// 轮询结束后的任务报告
///
/// `status` 为 `InProgress` 且带 `error` 时表示轮询超时，调用方应视为可重试，而不是文档失败。
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub handle: AsyncJobHandle,
    pub status: JobStatus,
    pub result: Option<ModelResponse>,
    pub error: Option<String>,
    /// 实际检查次数
    pub attempts: u32,
}

impl JobReport {
    pub fn is_timeout(&self) -> bool {
        self.status == JobStatus::InProgress && self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_body_chat_shape() {
        let body = json!({
            "choices": [{"message": {"content": "{\"result\":{}}"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = ModelResponse::from_output_body(&body);
        assert_eq!(resp.content, "{\"result\":{}}");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_output_body_fallbacks() {
        let resp = ModelResponse::from_output_body(&json!({"content": "plain"}));
        assert_eq!(resp.content, "plain");
        assert!(resp.usage.is_none());

        let resp = ModelResponse::from_output_body(&json!({"unexpected": 1}));
        assert_eq!(resp.content, "");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::Initiated.is_terminal());
    }
}
