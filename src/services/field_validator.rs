//! 字段格式校验
//!
//! 纯函数、全覆盖：每个输入字段都会得到 `is_valid`，不合格的值原样保留并附上错误说明。

use tracing::warn;

use crate::models::{ExtractedField, FieldCatalog};

/// 字段校验器
#[derive(Debug, Clone)]
pub struct FieldValidator {
    catalog: FieldCatalog,
}

impl FieldValidator {
    pub fn new(catalog: FieldCatalog) -> Self {
        Self { catalog }
    }

    /// 校验全部字段，输出与输入一一对应
    pub fn validate(&self, fields: Vec<ExtractedField>) -> Vec<ExtractedField> {
        fields.into_iter().map(|f| self.validate_field(f)).collect()
    }

    pub fn validate_field(&self, mut field: ExtractedField) -> ExtractedField {
        let failure = self
            .catalog
            .rule_for(&field.field_name)
            .filter(|rule| !rule.accepts(&field.value))
            .map(|rule| {
                format!(
                    "{} with value \"{}\" fails to match the {}",
                    field.field_name,
                    field.value,
                    rule.name()
                )
            });

        match failure {
            Some(message) => {
                warn!("⚠️ 字段校验未通过: {}", message);
                field.is_valid = Some(false);
                field.validation_error = Some(message);
            }
            None => {
                field.is_valid = Some(true);
                field.validation_error = None;
            }
        }
        field
    }
}
