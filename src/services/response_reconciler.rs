//! 模型输出对账 - 业务能力层
//!
//! 把模型返回的任意文本变成规范的字段列表。模型输出可能是：
//! - 纯 JSON
//! - 包在 markdown 代码块里的 JSON
//! - 换行 / 引号被转义过的 JSON
//! - 带尾逗号、未加引号的键、单引号值的 JSON
//! - `result` 本身又是一段 JSON 字符串（二次编码）
//!
//! 所有入口都是 fail-soft 的：解析失败只记日志，返回空列表或兜底结构，从不向上抛错。

use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::models::{ExtractedField, FieldCatalog};
use crate::services::json_repair::{first_object_span, parse_lenient, strip_code_fence, unescape};
use crate::utils::logging::truncate_text;

/// `result` 嵌套的最大层数
const MAX_NESTING: usize = 4;

/// 完整响应信封 `{result, accuracy}`
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub result: Value,
    pub accuracy: f64,
}

/// 单页对账结果
#[derive(Debug, Clone, PartialEq)]
pub struct PageExtraction {
    pub fields: Vec<ExtractedField>,
    pub accuracy: f64,
}

/// 模型输出对账器
#[derive(Debug, Clone)]
pub struct ResponseReconciler {
    catalog: FieldCatalog,
}

impl ResponseReconciler {
    pub fn new(catalog: FieldCatalog) -> Self {
        Self { catalog }
    }

    /// 只提取字段列表；任何失败都返回空列表
    ///
    /// 同名字段保留第一次出现的值，顺序按首次出现。
    pub fn parse_fields(&self, raw: &str) -> Vec<ExtractedField> {
        for candidate in candidates(raw) {
            if let Some(fields) = parse_lenient(&candidate).and_then(|v| locate_fields(&v, 0)) {
                return dedupe(fields);
            }
        }
        warn!(
            "⚠️ 无法从模型输出中解析字段列表: {}",
            truncate_text(raw, 120)
        );
        Vec::new()
    }

    /// 解析完整信封；失败时把原文作为 `result`、`accuracy = 0` 返回
    pub fn parse_envelope(&self, raw: &str) -> ResponseEnvelope {
        let mut texts = candidates(raw);
        if let Some(span) = first_object_span(raw) {
            texts.push(span.to_string());
        }

        for text in texts {
            if let Some(Value::Object(map)) = parse_lenient(&text) {
                let accuracy = map.get("accuracy").map(parse_accuracy).unwrap_or(0.0);
                let result = match map.get("result") {
                    Some(result) => result.clone(),
                    None => Value::Object(map),
                };
                return ResponseEnvelope { result, accuracy };
            }
        }

        warn!("⚠️ 模型输出不是有效的 JSON 对象，按原文保存");
        ResponseEnvelope {
            result: Value::String(raw.to_string()),
            accuracy: 0.0,
        }
    }

    /// 信封 + 字段列表；信封里找不到字段时退回到对原文整体解析
    pub fn reconcile(&self, raw: &str) -> PageExtraction {
        let envelope = self.parse_envelope(raw);
        let fields = match locate_fields(&envelope.result, 0) {
            Some(fields) => dedupe(fields),
            None => self.parse_fields(raw),
        };
        debug!(
            "对账完成: {} 个字段, accuracy={}",
            fields.len(),
            envelope.accuracy
        );
        PageExtraction {
            fields,
            accuracy: envelope.accuracy,
        }
    }

    /// 把新提取的字段合并到已有字段上，按字段目录顺序输出
    ///
    /// 已有的非空值优先；空值由新值填充；目录外的字段丢弃；两边都没出现过的字段不会被补出来。
    pub fn merge(
        &self,
        existing: &[ExtractedField],
        recovered: &[ExtractedField],
    ) -> Vec<ExtractedField> {
        let find = |list: &[ExtractedField], name: &str| {
            list.iter().find(|f| f.field_name == name).cloned()
        };

        self.catalog
            .iter()
            .filter_map(|def| {
                match (find(existing, def.name), find(recovered, def.name)) {
                    (Some(old), Some(new)) if old.is_empty() && !new.is_empty() => Some(ExtractedField {
                        value: new.value,
                        ..old
                    }),
                    (Some(old), _) => Some(old),
                    (None, Some(new)) => Some(new),
                    (None, None) => None,
                }
            })
            .collect()
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }
}

/// 依次尝试的文本：去代码块后的原文，以及再做一次反转义的版本
///
/// 先严格解析原文，二次编码的 `result` 才不会被反转义破坏。
fn candidates(raw: &str) -> Vec<String> {
    let stripped = strip_code_fence(raw);
    let unescaped = unescape(&stripped);
    if unescaped == stripped {
        vec![stripped]
    } else {
        vec![stripped, unescaped]
    }
}

/// 在解析结果里找字段数组：`fields`、`result.fields`、字符串形式的 `result`
fn locate_fields(value: &Value, depth: usize) -> Option<Vec<Value>> {
    if depth > MAX_NESTING {
        return None;
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(fields)) = map.get("fields") {
                return Some(fields.clone());
            }
            map.get("result").and_then(|r| locate_fields(r, depth + 1))
        }
        Value::String(text) => candidates(text)
            .iter()
            .filter_map(|c| parse_lenient(c))
            .find_map(|v| locate_fields(&v, depth + 1)),
        Value::Array(items) if items.iter().all(|i| i.get("fieldName").is_some()) => {
            Some(items.clone())
        }
        _ => None,
    }
}

/// 转成 `ExtractedField` 并按 fieldName 去重，第一次出现的胜出
fn dedupe(raw_fields: Vec<Value>) -> Vec<ExtractedField> {
    let mut seen = HashSet::new();
    let mut fields = Vec::new();

    for item in raw_fields {
        let Some(name) = item.get("fieldName").and_then(Value::as_str) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        let value = match item.get("value") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        fields.push(ExtractedField::new(name, value));
    }
    fields
}

fn parse_accuracy(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().trim_end_matches('%').parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
