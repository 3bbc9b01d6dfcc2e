//! 错误类型
//!
//! 按照处理策略划分：
//! - 配置错误：致命，不重试
//! - 推理错误：大部分可由轮询或外部调度器重试
//! - Token 预算超限：在任何网络调用之前抛出，调用方必须缩小输入
//! - 解析降级、校验不匹配：不是错误，直接落在数据里（空字段列表 / `is_valid=false`）

use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 推理服务错误
    #[error("推理错误: {0}")]
    Inference(#[from] InferenceError),
    /// 对象存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 文档实体存储错误
    #[error("文档错误: {0}")]
    Document(#[from] DocumentError),
    /// Token 预算超限
    #[error("Token 预算超限: {0}")]
    TokenBudget(#[from] TokenBudgetExceeded),
    /// 流水线阶段错误
    #[error("阶段错误: {0}")]
    Stage(#[from] StageError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填配置项缺失
    #[error("缺少必填配置项 {key}")]
    Missing { key: String },
    /// 配置项取值非法
    #[error("配置项 {key} 取值非法: {reason}")]
    Invalid { key: String, reason: String },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置文件读取或解析失败
    #[error("配置文件 {path} 读取失败: {reason}")]
    FileFailed { path: String, reason: String },
}

/// 推理服务错误
#[derive(Debug, Error)]
pub enum InferenceError {
    /// 请求构建失败
    #[error("请求构建失败: {0}")]
    RequestBuild(String),
    /// 端点调用失败
    #[error("端点调用失败 ({endpoint}): {reason}")]
    CallFailed { endpoint: String, reason: String },
    /// 端点超时
    #[error("端点调用超时 ({endpoint})")]
    Timeout { endpoint: String },
    /// 端点返回空结果或格式错误
    #[error("端点返回内容为空或格式错误 ({endpoint})")]
    EmptyResponse { endpoint: String },
    /// 异步调用未返回输出位置
    #[error("异步端点未返回输出位置 ({endpoint})")]
    MissingOutputLocation { endpoint: String },
    /// 推理任务失败（失败产物已写入）
    #[error("推理任务 {job_id} 失败: {reason}")]
    JobFailed { job_id: String, reason: String },
    /// 轮询超时
    #[error("推理任务 {job_id} 轮询超时: 已重试 {retries} 次")]
    PollTimeout { job_id: String, retries: u32 },
}

/// 对象存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 产物地址格式错误
    #[error("无效的产物地址: {uri}")]
    InvalidUri { uri: String },
    /// 读取失败
    #[error("读取 {location} 失败: {reason}")]
    ReadFailed { location: String, reason: String },
    /// 写入失败
    #[error("写入 {location} 失败: {reason}")]
    WriteFailed { location: String, reason: String },
    /// 内容无法反序列化
    #[error("{location} 内容解析失败: {reason}")]
    Corrupted { location: String, reason: String },
}

/// 文档实体错误
#[derive(Debug, Error)]
pub enum DocumentError {
    /// 文档不存在
    #[error("文档 {id} 不存在")]
    NotFound { id: String },
    /// 文档已存在
    #[error("文档 {id} 已存在")]
    AlreadyExists { id: String },
    /// 没有可更新的字段
    #[error("文档 {id} 没有可更新的字段")]
    EmptyUpdate { id: String },
}

/// Token 预算超限
#[derive(Debug, Error)]
#[error("预估 {estimated} tokens 超过可用额度 {available} tokens ({context})")]
pub struct TokenBudgetExceeded {
    pub estimated: usize,
    pub available: usize,
    pub context: String,
}

/// 流水线阶段错误
#[derive(Debug, Error)]
pub enum StageError {
    /// 阶段输入缺失或格式错误
    #[error("阶段 {stage} 的输入无效: {reason}")]
    InvalidPayload { stage: String, reason: String },
    /// 未知阶段
    #[error("未知的流水线阶段: {0}")]
    UnknownStage(String),
    /// 页面光栅化失败
    #[error("页面光栅化失败 ({source_uri}): {reason}")]
    Rasterize { source_uri: String, reason: String },
    /// 推理结果为空
    #[error("页面 {page} 的推理结果为空")]
    EmptyInference { page: u32 },
}

impl AppError {
    /// 是否可由轮询循环或外部调度器重试
    ///
    /// 配置错误、缺失输出位置、Token 超限以及输入格式错误都是确定性的，重试无意义。
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Config(_) | AppError::TokenBudget(_) => false,
            AppError::Inference(e) => matches!(
                e,
                InferenceError::CallFailed { .. }
                    | InferenceError::Timeout { .. }
                    | InferenceError::EmptyResponse { .. }
                    | InferenceError::PollTimeout { .. }
            ),
            AppError::Storage(e) => matches!(
                e,
                StorageError::ReadFailed { .. } | StorageError::WriteFailed { .. }
            ),
            AppError::Document(_) => false,
            AppError::Stage(e) => matches!(
                e,
                StageError::Rasterize { .. } | StageError::EmptyInference { .. }
            ),
            AppError::Other(_) => false,
        }
    }

    /// 返回给外部调度器的错误对象
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        })
    }
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Other(format!("JSON 处理失败: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Other(format!("IO 错误: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if err.is_timeout() {
            AppError::Inference(InferenceError::Timeout { endpoint })
        } else {
            AppError::Inference(InferenceError::CallFailed {
                endpoint,
                reason: err.to_string(),
            })
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(ConfigError::FileFailed {
            path: String::new(), // TOML 错误不包含路径信息
            reason: err.to_string(),
        })
    }
}

impl From<async_openai::error::OpenAIError> for AppError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        AppError::Inference(InferenceError::RequestBuild(err.to_string()))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建端点调用失败错误
    pub fn endpoint_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Inference(InferenceError::CallFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        })
    }

    /// 创建存储读取错误
    pub fn read_failed(location: impl ToString, reason: impl ToString) -> Self {
        AppError::Storage(StorageError::ReadFailed {
            location: location.to_string(),
            reason: reason.to_string(),
        })
    }

    /// 创建存储写入错误
    pub fn write_failed(location: impl ToString, reason: impl ToString) -> Self {
        AppError::Storage(StorageError::WriteFailed {
            location: location.to_string(),
            reason: reason.to_string(),
        })
    }

    /// 创建阶段输入错误
    pub fn invalid_payload(stage: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Stage(StageError::InvalidPayload {
            stage: stage.into(),
            reason: reason.to_string(),
        })
    }

    /// 创建缺失配置错误
    pub fn missing_config(key: impl Into<String>) -> Self {
        AppError::Config(ConfigError::Missing { key: key.into() })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(!AppError::missing_config("ASYNC_BUCKET").is_retryable());
        assert!(!AppError::Inference(InferenceError::MissingOutputLocation {
            endpoint: "qwen".into()
        })
        .is_retryable());
        assert!(!AppError::TokenBudget(TokenBudgetExceeded {
            estimated: 12000,
            available: 8000,
            context: "prompt".into(),
        })
        .is_retryable());

        assert!(AppError::Inference(InferenceError::PollTimeout {
            job_id: "job-1".into(),
            retries: 50
        })
        .is_retryable());
        assert!(AppError::Inference(InferenceError::Timeout {
            endpoint: "qwen".into()
        })
        .is_retryable());
    }

    #[test]
    fn test_payload_carries_message_and_flag() {
        let err = AppError::Inference(InferenceError::PollTimeout {
            job_id: "job-9".into(),
            retries: 3,
        });
        let payload = err.to_payload();
        assert_eq!(payload["retryable"], serde_json::json!(true));
        assert!(payload["error"].as_str().unwrap().contains("job-9"));
    }
}
