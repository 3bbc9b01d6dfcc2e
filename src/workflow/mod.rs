//! 流程层（Workflow）
//!
//! 定义"一页"的完整处理流程，只依赖业务能力层。

pub mod page_ctx;
pub mod page_flow;

pub use page_ctx::PageCtx;
pub use page_flow::PageFlow;
