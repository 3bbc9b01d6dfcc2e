//! 提示词构建 - 业务能力层
//!
//! 把字段目录和文档类型分类拼成一条完整的提取指令，并在末尾附上输出格式约定。
//! 下游解析器首先假设模型严格按这个格式返回，违反时才降级处理。

use serde_json::{json, Value};

use crate::models::{DocumentType, FieldCatalog};

const TASK_FRAMING: &str = "\
You are an expert medical document extraction assistant specializing in digitizing FAXed healthcare records for Home Health Agencies.
Extract all meaningful structured data from the provided FAX document with >95% accuracy for standard forms and >85% accuracy for handwritten text.

DOCUMENT PROCESSING INSTRUCTIONS:
- Perform image quality assessment and note any issues (skew, noise, poor resolution)
- Classify document type with confidence score
- Handle multi-document faxes by processing each separately
- Separate cover pages from clinical documents
- Apply enhanced processing for handwritten sections
- Use medical context to improve recognition accuracy
- Recognize standard medical abbreviations and terminology

Your task is to locate and extract **only** the following fields. Do not invent, infer, or return any other data.";

const QUALITY_CONTROL: &str = "\
QUALITY CONTROL:
- Flag fields with confidence <85% for human review
- Validate date formats and logical date ranges
- Verify phone numbers, zip codes, and NPI number formats
- Check ICD-10 and CPT code validity
- Note conflicting or duplicate information";

const MEDICAL_RULES: &str = "\
MEDICAL DOCUMENT SPECIFIC RULES:
- For CMS-485 forms: Extract all required home health certification fields
- For physician orders: Extract detailed medication and treatment orders
- For insurance forms: Process authorization and benefit information
- Maintain original medical terminology when clear
- Cross-reference handwritten sections with printed sections for validation";

const ACCURACY_RUBRIC: &str = "\
ACCURACY AND COMPLETENESS EVALUATION:
- Add to the response an accuracy value that evaluates its accuracy, relevance, and completeness.
- Accuracy is based on the value relevance. If the value has a Patient name label = 100, if it has a Member name label = 70, if it has no label = 20, etc.
- Identify any potential biases, gaps, or areas for improvement. The accuracy value is between 0 and 100.
- Don't include empty fields or fields whose value is not provided";

const FORMATTING_RULES: &str = "\
FORMATTING RULES (!!! VERY IMPORTANT !!!):
- Return the final result as a single clean and complete JSON object containing all the structured fields from the full document.
- Only return valid JSON. Do not explain or comment.
- Return the response in the following JSON structure, keeping all original fields. Do not include any extra text before or after the JSON structure.
- Stick strongly to the output format.
- Do not generate excessive newlines (\\n characters)
- Ignore blank areas and whitespace";

/// 提示词构建器
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    document_types: Vec<DocumentType>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            document_types: DocumentType::ALL.to_vec(),
        }
    }

    /// 为给定字段集合生成提取指令
    pub fn build(&self, fields: &FieldCatalog) -> String {
        let field_lines = fields
            .iter()
            .map(|f| {
                let mut line = format!("- fieldName: {}", f.name);
                if !f.expected_format.is_empty() {
                    line.push_str(&format!(" (Expected Format: {})", f.expected_format));
                }
                if !f.tip.is_empty() {
                    line.push_str(&format!(" (Tips: {})", f.tip));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");

        let type_lines = self
            .document_types
            .iter()
            .map(|t| format!("- documentType: {}  (Tips: {})", t.code(), t.description()))
            .collect::<Vec<_>>()
            .join("\n");

        let schema = serde_json::to_string_pretty(&self.response_schema(fields))
            .unwrap_or_else(|_| "{}".to_string());

        format!(
            "TASK DESCRIPTION:\n{TASK_FRAMING}\n\n\
             Extract the following Fields (strictly these):\n{field_lines}\n\n\
             {QUALITY_CONTROL}\n\n\
             {MEDICAL_RULES}\n\n\
             DOCUMENT_TYPES:\n{type_lines}\n\n\
             {ACCURACY_RUBRIC}\n\n\
             {FORMATTING_RULES}\n\n\
             OUTPUT FORMAT (!!! VERY IMPORTANT !!!):\n{schema}\n"
        )
    }

    /// 模型必须原样返回的 JSON 结构
    pub fn response_schema(&self, fields: &FieldCatalog) -> Value {
        let field_slots: Vec<Value> = fields
            .iter()
            .map(|f| json!({ "fieldName": f.name, "value": "" }))
            .collect();

        json!({
            "document_metadata": {
                "document_type": "string (from DOCUMENT_TYPES)",
                "classification_confidence": "number (0-1)",
                "processing_notes": "string",
            },
            "result": { "fields": field_slots },
            "quality_indicators": {
                "overall_confidence": "number (0-1)",
                "fields_requiring_review": ["array of field names with confidence <0.85"],
                "extraction_issues": "string noting any processing problems",
            },
            "accuracy": "number (0-100)",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldCategory;

    #[test]
    fn test_every_field_listed_once() {
        let catalog = FieldCatalog::standard();
        let prompt = PromptBuilder::new().build(&catalog);
        for field in catalog.iter() {
            let line = format!("- fieldName: {} (Expected Format: {})", field.name, field.expected_format);
            assert_eq!(prompt.matches(&line).count(), 1, "字段行缺失或重复: {}", field.name);
        }
        assert!(prompt.contains("**only**"));
        assert!(prompt.contains("Do not invent"));
    }

    #[test]
    fn test_document_types_listed() {
        let prompt = PromptBuilder::new().build(&FieldCatalog::standard());
        for t in DocumentType::ALL {
            assert!(prompt.contains(&format!("- documentType: {}  (Tips: ", t.code())));
        }
    }

    #[test]
    fn test_output_contract_is_valid_json() {
        let catalog = FieldCatalog::standard();
        let prompt = PromptBuilder::new().build(&catalog);
        let (_, schema) = prompt
            .split_once("OUTPUT FORMAT (!!! VERY IMPORTANT !!!):\n")
            .unwrap();
        let schema: Value = serde_json::from_str(schema.trim()).unwrap();
        assert_eq!(
            schema["result"]["fields"].as_array().unwrap().len(),
            catalog.len()
        );
        assert_eq!(schema["accuracy"], json!("number (0-100)"));
    }

    #[test]
    fn test_subset_restricts_fields() {
        let catalog = FieldCatalog::standard();
        let dates = catalog.subset(|f| f.category == FieldCategory::CriticalDates);
        let prompt = PromptBuilder::new().build(&dates);
        assert!(prompt.contains("- fieldName: Admission Date"));
        assert!(!prompt.contains("- fieldName: Full Name"));
    }
}
