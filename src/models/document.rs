//! 文档实体与流水线各阶段的载荷
//!
//! 阶段载荷都是外部调度器在阶段之间传递的 JSON，字段名使用 camelCase。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 文档状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    Initialized,
    Uploaded,
    #[serde(rename = "In progress")]
    InProgress,
    Processed,
    #[serde(rename = "Partially Processed")]
    PartiallyProcessed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Initialized => "Initialized",
            DocumentStatus::Uploaded => "Uploaded",
            DocumentStatus::InProgress => "In progress",
            DocumentStatus::Processed => "Processed",
            DocumentStatus::PartiallyProcessed => "Partially Processed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文档实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub status: DocumentStatus,
    pub source_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_uri: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        source_uri: impl Into<String>,
        status: DocumentStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            filename: filename.into(),
            status,
            source_uri: source_uri.into(),
            result_uri: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 文档实体的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub status: Option<DocumentStatus>,
    pub result_uri: Option<String>,
}

impl DocumentUpdate {
    pub fn status(status: DocumentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_result_uri(mut self, uri: impl Into<String>) -> Self {
        self.result_uri = Some(uri.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.result_uri.is_none()
    }
}

// ========== 阶段载荷 ==========

/// Prepare 阶段的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentJob {
    pub file_id: String,
    pub filename: String,
    /// 源 PDF 地址，`s3://bucket/key`
    pub source_uri: String,
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_output_prefix() -> String {
    "images".to_string()
}

fn default_format() -> String {
    "jpeg".to_string()
}

/// 单页任务，Extract 阶段的输入
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTask {
    pub file_id: String,
    pub filename: String,
    pub page: u32,
    pub image_uri: String,
}

/// Prepare 阶段的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedDocument {
    pub file_id: String,
    pub filename: String,
    pub source_uri: String,
    pub pages: Vec<PageTask>,
}

/// 单页处理结局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    /// 已完成推理并合并到中间结果
    Extracted,
    /// 没有待提取字段，跳过推理
    Skipped,
}

/// Extract 阶段的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageOutcome {
    pub file_id: String,
    pub filename: String,
    pub page: u32,
    pub state: PageState,
    /// 中间结果的存储地址
    pub result_key: String,
    #[serde(default)]
    pub field_count: usize,
    #[serde(default)]
    pub accuracy: f64,
}

/// Consolidate 阶段的输入：Prepare 的输出 + 各页的结局
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatePayload {
    pub file_id: String,
    pub filename: String,
    pub source_uri: String,
    pub expected_pages: u32,
    #[serde(default)]
    pub outcomes: Vec<PageOutcome>,
}

impl ConsolidatePayload {
    /// 由 Prepare 输出和已收集的页面结局组装
    pub fn from_prepared(prepared: &PreparedDocument, outcomes: Vec<PageOutcome>) -> Self {
        Self {
            file_id: prepared.file_id.clone(),
            filename: prepared.filename.clone(),
            source_uri: prepared.source_uri.clone(),
            expected_pages: prepared.pages.len() as u32,
            outcomes,
        }
    }

    /// 没有终态结局的页号
    pub fn missing_pages(&self) -> Vec<u32> {
        let done: BTreeSet<u32> = self.outcomes.iter().map(|o| o.page).collect();
        (1..=self.expected_pages)
            .filter(|p| !done.contains(p))
            .collect()
    }
}

/// Consolidate 阶段的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSummary {
    pub file_id: String,
    pub status: DocumentStatus,
    pub result_uri: String,
    pub field_count: usize,
    pub invalid_count: usize,
    pub accuracy: f64,
    pub missing_pages: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(DocumentStatus::InProgress).unwrap(),
            json!("In progress")
        );
        assert_eq!(
            serde_json::to_value(DocumentStatus::PartiallyProcessed).unwrap(),
            json!("Partially Processed")
        );
        let status: DocumentStatus = serde_json::from_value(json!("Processed")).unwrap();
        assert_eq!(status, DocumentStatus::Processed);
    }

    #[test]
    fn test_job_defaults() {
        let job: DocumentJob = serde_json::from_value(json!({
            "fileId": "f-1",
            "filename": "referral.pdf",
            "sourceUri": "s3://input/referral.pdf"
        }))
        .unwrap();
        assert_eq!(job.output_prefix, "images");
        assert_eq!(job.format, "jpeg");
    }

    #[test]
    fn test_missing_pages() {
        let outcome = |page| PageOutcome {
            file_id: "f".into(),
            filename: "a.pdf".into(),
            page,
            state: PageState::Extracted,
            result_key: "s3://output/text/a.pdf.json".into(),
            field_count: 0,
            accuracy: 0.0,
        };
        let payload = ConsolidatePayload {
            file_id: "f".into(),
            filename: "a.pdf".into(),
            source_uri: "s3://input/a.pdf".into(),
            expected_pages: 3,
            outcomes: vec![outcome(1), outcome(3)],
        };
        assert_eq!(payload.missing_pages(), vec![2]);
    }
}
