//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责阶段调度和批量处理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `pipeline` - 流水线阶段处理器
//! - 上传登记、Prepare、Extract、Consolidate
//! - `invoke(stage, payload)`：供外部调度方使用的 JSON 入口
//!
//! ### `document_processor` - 单个文档处理器
//! - 本地运行时扮演调度方，把一个文档送过全部阶段
//! - 按页并发提取（Semaphore）
//!
//! ### `batch_processor` - 批量文档处理器
//! - 管理应用生命周期，创建基础设施实现
//! - 分批处理、输出全局统计
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<源 PDF>)
//!     ↓
//! document_processor (处理 Vec<PageTask>)
//!     ↓
//! pipeline::PipelineOrchestrator (阶段处理器)
//!     ↓
//! workflow::PageFlow (处理单页)
//!     ↓
//! services (能力层：prompt / submit / reconcile / validate)
//!     ↓
//! infrastructure (基础设施：ObjectStore / ModelEndpoint / PageRasterizer)
//! ```

pub mod batch_processor;
pub mod document_processor;
pub mod pipeline;

// 重新导出主要类型
pub use batch_processor::App;
pub use document_processor::{process_document, DocumentRun};
pub use pipeline::{PipelineOrchestrator, Stage};
