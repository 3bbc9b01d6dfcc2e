//! 通用轮询原语
//!
//! 重试策略是一个值对象，和"轮询什么"无关；任何基于产物是否出现的异步协作方都可以复用。

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::AppResult;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最多检查次数
    pub max_attempts: u32,
    /// 首次间隔
    pub interval: Duration,
    /// 每次间隔的放大倍数，`None` 表示固定间隔
    pub backoff: Option<f64>,
    /// 间隔上限
    pub max_interval: Option<Duration>,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: None,
            max_interval: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.poll_max_retries,
            interval: Duration::from_millis(config.poll_interval_ms),
            backoff: config.poll_backoff,
            max_interval: None,
        }
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = Some(factor);
        self.max_interval = Some(max_interval);
        self
    }

    /// 第 `attempt` 次检查（从 1 开始）之后的等待时间
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Some(factor) if factor > 1.0 => {
                let exp = attempt.saturating_sub(1).min(32) as i32;
                self.interval.mul_f64(factor.powi(exp))
            }
            _ => self.interval,
        };
        match self.max_interval {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// 预算耗尽前最多阻塞的时间
    pub fn budget(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

/// 轮询结果
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult<T> {
    /// 条件满足
    Ready(T),
    /// 预算耗尽仍未满足
    Exhausted { attempts: u32 },
}

/// 反复执行 `probe` 直到返回 `Some` 或检查次数用完
///
/// `probe` 收到当前是第几次检查（从 1 开始）。只在两次检查之间等待，最后一次检查之后立即返回。
/// `probe` 返回的错误立刻向上传播，不消耗重试预算。
pub async fn poll_until<T, F, Fut>(policy: &RetryPolicy, mut probe: F) -> AppResult<PollResult<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<Option<T>>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if let Some(value) = probe(attempt).await? {
            return Ok(PollResult::Ready(value));
        }

        if attempt < max_attempts {
            let delay = policy.delay_after(attempt);
            debug!("尝试 {}/{} 未就绪，{:?} 后重试", attempt, max_attempts, delay);
            tokio::time::sleep(delay).await;
        }
    }

    Ok(PollResult::Exhausted {
        attempts: max_attempts,
    })
}
