//! 字段相关的数据结构

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 字段分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldCategory {
    /// 患者基本信息
    PatientDemographics,
    /// 医疗服务提供方
    ProviderInformation,
    /// 保险信息
    InsuranceDetails,
    /// 临床数据
    ClinicalData,
    /// 关键日期
    CriticalDates,
}

impl FieldCategory {
    /// 所有分类，按字段目录顺序排列
    pub const ALL: [FieldCategory; 5] = [
        FieldCategory::PatientDemographics,
        FieldCategory::ProviderInformation,
        FieldCategory::InsuranceDetails,
        FieldCategory::ClinicalData,
        FieldCategory::CriticalDates,
    ];
}

/// 可提取字段的定义（不可变的参考数据）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub expected_format: &'static str,
    pub tip: &'static str,
    pub category: FieldCategory,
}

/// 模型提取出的单个字段
///
/// 由响应解析器生成（不带校验信息），再由字段校验器原地补充 `is_valid` / `validation_error`。
/// 对外 JSON 中 `isValid` 以 `"true"` / `"false"` 字符串表示，与前端约定保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedField {
    pub field_name: String,
    #[serde(default)]
    pub value: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_flag",
        deserialize_with = "deserialize_flag"
    )]
    pub is_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

impl ExtractedField {
    pub fn new(field_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            value: value.into(),
            is_valid: None,
            validation_error: None,
        }
    }

    /// 值是否为空（仅包含空白也算空）
    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// 单页处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub page: u32,
    pub fields: Vec<ExtractedField>,
    pub accuracy: f64,
}

/// 文档级最终结果，写入持久化存储
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub fields: Vec<ExtractedField>,
    pub accuracy: f64,
}

impl DocumentResult {
    /// 存储格式：`{ "result": { "fields": [...] }, "accuracy": n }`
    pub fn to_artifact(&self) -> serde_json::Value {
        serde_json::json!({
            "result": { "fields": self.fields },
            "accuracy": self.accuracy,
        })
    }

    /// 未通过格式校验的字段数
    pub fn invalid_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.is_valid == Some(false))
            .count()
    }
}

fn serialize_flag<S: Serializer>(flag: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
    match flag {
        Some(true) => serializer.serialize_str("true"),
        Some(false) => serializer.serialize_str("false"),
        None => serializer.serialize_none(),
    }
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => Some(b),
        Some(Flag::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        None => None,
    })
}
