//! 程序配置
//!
//! 进程启动时构建一次，通过引用传入各组件构造函数。
//! 加载顺序：默认值 → TOML 文件（可选）→ 环境变量覆盖。

use serde::Deserialize;
use std::path::Path;

use crate::error::{AppResult, ConfigError};

/// 页面图片传给模型的方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageImageMode {
    /// 预签名（可寻址）URL
    Presigned,
    /// base64 data URL，适用于无法访问存储的端点
    Inline,
}

impl std::str::FromStr for PageImageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "presigned" => Ok(PageImageMode::Presigned),
            "inline" => Ok(PageImageMode::Inline),
            other => Err(format!("未知的图片模式: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 模型服务 ---
    /// OpenAI 兼容的同步推理端点
    pub model_endpoint_url: String,
    /// 异步推理调用地址
    pub model_async_endpoint_url: String,
    pub model_api_key: String,
    pub model_name: String,
    pub temperature: f32,
    /// 单次补全的最大 token 数
    pub max_tokens: u32,
    pub top_p: f32,
    /// 服务端单次调用超时（秒）
    pub invocation_timeout_secs: u64,
    /// 服务端请求存活时间（秒）
    pub request_ttl_secs: u64,

    // --- 轮询 ---
    pub poll_max_retries: u32,
    pub poll_interval_ms: u64,
    /// 每次轮询后间隔的放大倍数，不设置则固定间隔
    pub poll_backoff: Option<f64>,

    // --- Token 预算 ---
    /// 单个请求（提示词 + 补全）允许的最大 token 数
    pub token_ceiling: usize,

    // --- 存储 ---
    pub storage_root: String,
    pub input_bucket: String,
    pub async_bucket: String,
    pub output_bucket: String,

    // --- 光栅化 ---
    pub rasterizer_binary: String,
    pub rasterizer_dpi: u32,
    pub image_format: String,
    pub page_image_mode: PageImageMode,

    // --- 并发 ---
    /// 单个文档内同时提取的页数
    pub max_concurrent_pages: usize,
    /// 同时处理的文档数量
    pub max_concurrent_documents: usize,

    // --- 本地运行 ---
    /// 待处理 PDF 所在目录
    pub input_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 运行日志文件
    pub output_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_endpoint_url: "http://localhost:8080/v1".to_string(),
            model_async_endpoint_url: String::new(),
            model_api_key: String::new(),
            model_name: "qwen2.5-vl-7b-instruct".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            top_p: 0.9,
            invocation_timeout_secs: 3600,
            request_ttl_secs: 21600,
            poll_max_retries: 50,
            poll_interval_ms: 10_000,
            poll_backoff: None,
            token_ceiling: 10_000,
            storage_root: "storage".to_string(),
            input_bucket: "input".to_string(),
            async_bucket: "async".to_string(),
            output_bucket: "output".to_string(),
            rasterizer_binary: "pdftoppm".to_string(),
            rasterizer_dpi: 150,
            image_format: "jpeg".to_string(),
            page_image_mode: PageImageMode::Presigned,
            max_concurrent_pages: 2,
            max_concurrent_documents: 4,
            input_folder: "input_pdf".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，缺省的键使用默认值
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::FileFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// 完整加载流程：`CONFIG_FILE` 指向的文件（若存在）→ 环境变量覆盖 → 校验
    pub fn load() -> AppResult<Self> {
        let base = match std::env::var("CONFIG_FILE") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        let config = base.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// 用环境变量覆盖已有取值
    pub fn with_env_overrides(self) -> Self {
        let d = self;
        Self {
            model_endpoint_url: env_string("MODEL_ENDPOINT_URL", d.model_endpoint_url),
            model_async_endpoint_url: env_string("MODEL_ASYNC_ENDPOINT_URL", d.model_async_endpoint_url),
            model_api_key: env_string("MODEL_API_KEY", d.model_api_key),
            model_name: env_string("MODEL_NAME", d.model_name),
            temperature: env_parse("MODEL_TEMPERATURE", d.temperature),
            max_tokens: env_parse("MODEL_MAX_TOKENS", d.max_tokens),
            top_p: env_parse("MODEL_TOP_P", d.top_p),
            invocation_timeout_secs: env_parse("INVOCATION_TIMEOUT_SECS", d.invocation_timeout_secs),
            request_ttl_secs: env_parse("REQUEST_TTL_SECS", d.request_ttl_secs),
            poll_max_retries: env_parse("POLL_MAX_RETRIES", d.poll_max_retries),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS", d.poll_interval_ms),
            poll_backoff: std::env::var("POLL_BACKOFF").ok().and_then(|v| v.parse().ok()).or(d.poll_backoff),
            token_ceiling: env_parse("TOKEN_CEILING", d.token_ceiling),
            storage_root: env_string("STORAGE_ROOT", d.storage_root),
            input_bucket: env_string("INPUT_BUCKET", d.input_bucket),
            async_bucket: env_string("ASYNC_BUCKET", d.async_bucket),
            output_bucket: env_string("OUTPUT_BUCKET", d.output_bucket),
            rasterizer_binary: env_string("RASTERIZER_BINARY", d.rasterizer_binary),
            rasterizer_dpi: env_parse("RASTERIZER_DPI", d.rasterizer_dpi),
            image_format: env_string("IMAGE_FORMAT", d.image_format),
            page_image_mode: env_parse("PAGE_IMAGE_MODE", d.page_image_mode),
            max_concurrent_pages: env_parse("MAX_CONCURRENT_PAGES", d.max_concurrent_pages),
            max_concurrent_documents: env_parse("MAX_CONCURRENT_DOCUMENTS", d.max_concurrent_documents),
            input_folder: env_string("INPUT_FOLDER", d.input_folder),
            verbose_logging: env_parse("VERBOSE_LOGGING", d.verbose_logging),
            output_log_file: env_string("OUTPUT_LOG_FILE", d.output_log_file),
        }
    }

    /// 校验必填项与取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("MODEL_ENDPOINT_URL", &self.model_endpoint_url),
            ("MODEL_NAME", &self.model_name),
            ("INPUT_BUCKET", &self.input_bucket),
            ("ASYNC_BUCKET", &self.async_bucket),
            ("OUTPUT_BUCKET", &self.output_bucket),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing { key: key.to_string() });
            }
        }

        if self.poll_max_retries == 0 {
            return Err(invalid("POLL_MAX_RETRIES", "必须大于 0"));
        }
        if self.max_concurrent_pages == 0 {
            return Err(invalid("MAX_CONCURRENT_PAGES", "必须大于 0"));
        }
        if self.max_concurrent_documents == 0 {
            return Err(invalid("MAX_CONCURRENT_DOCUMENTS", "必须大于 0"));
        }
        if self.max_tokens as usize >= self.token_ceiling {
            return Err(invalid("MODEL_MAX_TOKENS", "必须小于 TOKEN_CEILING"));
        }
        if let Some(backoff) = self.poll_backoff {
            if backoff < 1.0 {
                return Err(invalid("POLL_BACKOFF", "不能小于 1.0"));
            }
        }
        Ok(())
    }

    /// 异步调用地址，未配置时属于致命的配置错误
    pub fn async_endpoint(&self) -> Result<&str, ConfigError> {
        if self.model_async_endpoint_url.trim().is_empty() {
            Err(ConfigError::Missing {
                key: "MODEL_ASYNC_ENDPOINT_URL".to_string(),
            })
        } else {
            Ok(&self.model_async_endpoint_url)
        }
    }
}

fn env_string(var: &str, default: String) -> String {
    std::env::var(var).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_max_retries, 50);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.max_concurrent_pages, 2);
    }

    #[test]
    fn test_missing_bucket_is_fatal() {
        let config = Config {
            output_bucket: "  ".to_string(),
            ..Config::default()
        };
        match config.validate() {
            Err(ConfigError::Missing { key }) => assert_eq!(key, "OUTPUT_BUCKET"),
            other => panic!("期望 Missing 错误, 实际: {:?}", other),
        }
    }

    #[test]
    fn test_async_endpoint_required_on_use() {
        let config = Config::default();
        assert!(config.async_endpoint().is_err());

        let config = Config {
            model_async_endpoint_url: "http://localhost:8080/async".to_string(),
            ..Config::default()
        };
        assert_eq!(config.async_endpoint().unwrap(), "http://localhost:8080/async");
    }

    #[test]
    fn test_from_file_partial_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
model_name = "nemotron"
poll_max_retries = 5
page_image_mode = "inline"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.model_name, "nemotron");
        assert_eq!(config.poll_max_retries, 5);
        assert_eq!(config.page_image_mode, PageImageMode::Inline);
        // 未出现的键保持默认值
        assert_eq!(config.max_tokens, 1024);
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = Config {
            poll_max_retries: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }
}
