pub mod catalog;
pub mod document;
pub mod field;
pub mod inference;

pub use catalog::{DocumentType, FieldCatalog, FieldPattern, FormatRule};
pub use document::{
    ConsolidatePayload, ConsolidationSummary, DocumentJob, DocumentRecord, DocumentStatus,
    DocumentUpdate, PageOutcome, PageState, PageTask, PreparedDocument,
};
pub use field::{DocumentResult, ExtractedField, FieldCategory, FieldDefinition, PageResult};
pub use inference::{
    AsyncJobHandle, ExtractionRequest, JobReport, JobStatus, ModelResponse, StatusCheck,
    TokenUsage,
};
