//! Token 预算检查
//!
//! 网络调用之前的预检：估算超过预算就直接报错，从不自动截断输入。

use crate::config::Config;
use crate::error::TokenBudgetExceeded;

const WIDE_CHAR_WEIGHT: f64 = 1.0;
const WORD_WEIGHT: f64 = 1.3;
const SYMBOL_WEIGHT: f64 = 0.5;
const CHAR_OVERHEAD: f64 = 0.1;

/// Token 预算：`max_tokens` 中扣掉 `reserved` 后才是输入可用的额度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub max_tokens: usize,
    pub reserved: usize,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(28_000, 2_000)
    }
}

impl TokenBudget {
    pub fn new(max_tokens: usize, reserved: usize) -> Self {
        Self {
            max_tokens,
            reserved,
        }
    }

    /// 单个请求的预算：补全 token 从上限中预留
    pub fn request_budget(config: &Config) -> Self {
        Self::new(config.token_ceiling, config.max_tokens as usize)
    }

    pub fn available(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved)
    }

    /// 粗略估算 token 数
    ///
    /// 宽字符（CJK）每个 1.0，其余文本中每个单词 1.3、每个标点符号 0.5，另外每个字符 0.1。
    pub fn estimate(text: &str) -> usize {
        let mut wide = 0usize;
        let mut symbols = 0usize;
        let mut chars = 0usize;
        let mut narrow = String::with_capacity(text.len());

        for c in text.chars() {
            chars += 1;
            if is_wide(c) {
                wide += 1;
                continue;
            }
            narrow.push(c);
            if !c.is_whitespace() && !c.is_ascii_alphanumeric() && c != '_' {
                symbols += 1;
            }
        }
        let words = narrow.split_whitespace().count();

        let estimate = wide as f64 * WIDE_CHAR_WEIGHT
            + words as f64 * WORD_WEIGHT
            + symbols as f64 * SYMBOL_WEIGHT
            + chars as f64 * CHAR_OVERHEAD;
        estimate.ceil() as usize
    }

    pub fn exceeds(&self, text: &str) -> bool {
        Self::estimate(text) > self.available()
    }

    /// 预检；通过时返回估算值
    pub fn check(&self, text: &str, context: &str) -> Result<usize, TokenBudgetExceeded> {
        let estimated = Self::estimate(text);
        let available = self.available();
        if estimated > available {
            return Err(TokenBudgetExceeded {
                estimated,
                available,
                context: context.to_string(),
            });
        }
        Ok(estimated)
    }
}

fn is_wide(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}
