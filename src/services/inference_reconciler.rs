//! 异步推理对账 - 业务能力层
//!
//! 根据输出 / 失败产物是否存在推导任务状态，并在有限的重试预算内轮询到终态。
//! 先查输出再查失败：失败路径上的读错误不能掩盖已经完成的结果。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{AppResult, InferenceError};
use crate::infrastructure::{ArtifactLocation, ObjectStore};
use crate::models::{AsyncJobHandle, JobReport, JobStatus, ModelResponse, StatusCheck};
use crate::utils::logging::truncate_text;
use crate::utils::retry::{poll_until, PollResult, RetryPolicy};

/// 推理对账器
pub struct InferenceReconciler {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl InferenceReconciler {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 检查一次任务状态
    ///
    /// 只有句柄里的地址本身不合法时才返回错误；读取失败都按"未完成"处理。
    pub async fn check_status(&self, handle: &AsyncJobHandle) -> AppResult<StatusCheck> {
        let output: ArtifactLocation = handle.output_location.parse()?;
        let failure: ArtifactLocation = handle.failure_location.parse()?;

        match self.store.get_json(&output).await {
            Ok(Some(body)) => {
                return Ok(StatusCheck::Completed(ModelResponse::from_output_body(&body)));
            }
            Ok(None) => {}
            Err(e) => warn!("任务 {} 输出产物读取失败，继续检查失败产物: {}", handle.job_id, e),
        }

        match self.store.get(&failure).await {
            Ok(Some(body)) => Ok(StatusCheck::Failed(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            Ok(None) => Ok(StatusCheck::InProgress),
            Err(e) => {
                warn!("任务 {} 失败产物读取失败，按进行中处理: {}", handle.job_id, e);
                Ok(StatusCheck::InProgress)
            }
        }
    }

    /// 使用默认策略轮询到终态
    pub async fn poll_until_terminal(&self, handle: &AsyncJobHandle) -> AppResult<JobReport> {
        self.poll_with(handle, &self.policy).await
    }

    /// 使用指定策略轮询到终态
    ///
    /// 预算耗尽时返回 `InProgress` + 超时错误，这是可重试的结局，不是任务失败。
    pub async fn poll_with(&self, handle: &AsyncJobHandle, policy: &RetryPolicy) -> AppResult<JobReport> {
        let outcome = poll_until(policy, |attempt| async move {
            let check = self.check_status(handle).await?;
            debug!(
                "任务 {} 第 {}/{} 次检查: {:?}",
                handle.job_id,
                attempt,
                policy.max_attempts,
                check.status()
            );
            Ok(match check {
                StatusCheck::InProgress => None,
                terminal => Some((attempt, terminal)),
            })
        })
        .await?;

        let report = match outcome {
            PollResult::Ready((attempts, StatusCheck::Completed(response))) => {
                info!("✓ 任务 {} 已完成 (检查 {} 次)", handle.job_id, attempts);
                JobReport {
                    handle: handle.clone(),
                    status: JobStatus::Completed,
                    result: Some(response),
                    error: None,
                    attempts,
                }
            }
            PollResult::Ready((attempts, StatusCheck::Failed(body))) => {
                warn!(
                    "❌ 任务 {} 失败: {}",
                    handle.job_id,
                    truncate_text(&body, 200)
                );
                JobReport {
                    handle: handle.clone(),
                    status: JobStatus::Failed,
                    result: None,
                    error: Some(body),
                    attempts,
                }
            }
            PollResult::Ready((attempts, StatusCheck::InProgress)) | PollResult::Exhausted { attempts } => {
                warn!("⚠️ 任务 {} 轮询超时: 已检查 {} 次", handle.job_id, attempts);
                JobReport {
                    handle: handle.clone(),
                    status: JobStatus::InProgress,
                    result: None,
                    error: Some(format!("Polling timeout after {} retries", attempts)),
                    attempts,
                }
            }
        };
        Ok(report)
    }
}

/// 只接受已完成的任务；失败和超时转成对应的推理错误
pub fn require_completed(report: JobReport) -> AppResult<ModelResponse> {
    match (report.status, report.result) {
        (JobStatus::Completed, Some(response)) => Ok(response),
        (JobStatus::Failed, _) => Err(InferenceError::JobFailed {
            job_id: report.handle.job_id,
            reason: report.error.unwrap_or_default(),
        }
        .into()),
        _ => Err(InferenceError::PollTimeout {
            job_id: report.handle.job_id,
            retries: report.attempts,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::infrastructure::MemoryObjectStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// 失败产物在第 N 次读取之后才出现；可选地让失败路径的读取出错
    struct ScriptedStore {
        inner: MemoryObjectStore,
        failure: ArtifactLocation,
        failure_body: Option<Vec<u8>>,
        reveal_after: u32,
        failure_reads: AtomicU32,
        failure_read_errors: bool,
    }

    impl ScriptedStore {
        fn new(failure: ArtifactLocation) -> Self {
            Self {
                inner: MemoryObjectStore::new(),
                failure,
                failure_body: None,
                reveal_after: 0,
                failure_reads: AtomicU32::new(0),
                failure_read_errors: false,
            }
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn put(&self, location: &ArtifactLocation, body: Vec<u8>, content_type: &str) -> AppResult<()> {
            self.inner.put(location, body, content_type).await
        }

        async fn get(&self, location: &ArtifactLocation) -> AppResult<Option<Vec<u8>>> {
            if *location != self.failure {
                return self.inner.get(location).await;
            }
            if self.failure_read_errors {
                return Err(AppError::read_failed(location, "connection reset"));
            }
            let reads = self.failure_reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if reads > self.reveal_after {
                self.failure_body.clone()
            } else {
                None
            })
        }

        fn presign(&self, location: &ArtifactLocation) -> String {
            self.inner.presign(location)
        }
    }

    fn handle() -> AsyncJobHandle {
        AsyncJobHandle {
            job_id: "job-1".into(),
            output_location: "s3://async/output/job-1/output.json".into(),
            failure_location: "s3://async/error/job-1/error.json".into(),
            input_location: "s3://async/input/job-1/input.json".into(),
        }
    }

    fn failure_location() -> ArtifactLocation {
        "s3://async/error/job-1/error.json".parse().unwrap()
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(max_attempts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_poll_respects_bound() {
        let store = Arc::new(MemoryObjectStore::new());
        let reconciler = InferenceReconciler::new(store, fast_policy(3));

        let started = Instant::now();
        let report = reconciler.poll_until_terminal(&handle()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.status, JobStatus::InProgress);
        assert!(report.is_timeout());
        assert_eq!(report.error.as_deref(), Some("Polling timeout after 3 retries"));
        assert!(elapsed < Duration::from_millis(300), "耗时 {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_failure_appearing_after_two_polls() {
        let mut store = ScriptedStore::new(failure_location());
        store.failure_body = Some(b"{\"error\":\"CUDA out of memory\"}".to_vec());
        store.reveal_after = 2;
        let reconciler = InferenceReconciler::new(Arc::new(store), fast_policy(10));

        let report = reconciler.poll_until_terminal(&handle()).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("{\"error\":\"CUDA out of memory\"}"));
        assert_eq!(report.attempts, 3);
        assert!(matches!(
            require_completed(report),
            Err(AppError::Inference(InferenceError::JobFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_output_checked_before_failure() {
        let mut store = ScriptedStore::new(failure_location());
        store.failure_read_errors = true;
        let output: ArtifactLocation = handle().output_location.parse().unwrap();
        store
            .put_json(
                &output,
                &json!({"choices": [{"message": {"content": "{\"accuracy\": 90}"}}]}),
            )
            .await
            .unwrap();
        let reconciler = InferenceReconciler::new(Arc::new(store), fast_policy(3));

        let check = reconciler.check_status(&handle()).await.unwrap();
        assert_eq!(check.status(), JobStatus::Completed);

        let report = reconciler.poll_until_terminal(&handle()).await.unwrap();
        assert_eq!(report.attempts, 1);
        let response = require_completed(report).unwrap();
        assert_eq!(response.content, "{\"accuracy\": 90}");
    }

    #[tokio::test]
    async fn test_failure_read_error_is_in_progress() {
        let mut store = ScriptedStore::new(failure_location());
        store.failure_read_errors = true;
        let reconciler = InferenceReconciler::new(Arc::new(store), fast_policy(2));

        let check = reconciler.check_status(&handle()).await.unwrap();
        assert_eq!(check, StatusCheck::InProgress);

        let report = reconciler.poll_until_terminal(&handle()).await.unwrap();
        assert!(matches!(
            require_completed(report),
            Err(AppError::Inference(InferenceError::PollTimeout { retries: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_output_falls_through() {
        let store = Arc::new(MemoryObjectStore::new());
        let output: ArtifactLocation = handle().output_location.parse().unwrap();
        store.put(&output, b"<html>".to_vec(), "text/html").await.unwrap();
        let reconciler = InferenceReconciler::new(store, fast_policy(1));
        assert_eq!(
            reconciler.check_status(&handle()).await.unwrap(),
            StatusCheck::InProgress
        );
    }

    #[tokio::test]
    async fn test_malformed_handle_is_error() {
        let reconciler = InferenceReconciler::new(Arc::new(MemoryObjectStore::new()), fast_policy(3));
        let mut bad = handle();
        bad.output_location = "nowhere".into();
        assert!(reconciler.poll_until_terminal(&bad).await.is_err());
    }
}
