//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，不关心流水线阶段，也不持有阶段之间的状态。

pub mod field_validator;
pub mod inference_reconciler;
pub mod inference_submitter;
pub mod intermediate_store;
pub mod json_repair;
pub mod prompt_builder;
pub mod response_reconciler;
pub mod token_budget;

pub use field_validator::FieldValidator;
pub use inference_reconciler::{require_completed, InferenceReconciler};
pub use inference_submitter::InferenceSubmitter;
pub use intermediate_store::{IntermediateResult, IntermediateStore};
pub use prompt_builder::PromptBuilder;
pub use response_reconciler::{PageExtraction, ResponseEnvelope, ResponseReconciler};
pub use token_budget::TokenBudget;
