//! # Doc Field Extract
//!
//! 传真医疗文档的字段提取流水线：异步推理编排 + 模型输出对账
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 对外部协作方的能力抽象与实现
//! - `ObjectStore` - 产物读写（本地目录 / 内存）
//! - `ModelEndpoint` - 同步 / 异步模型调用
//! - `DocumentStore` - 文档实体状态
//! - `PageRasterizer` - PDF 逐页转图片
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不关心流水线阶段
//! - `PromptBuilder` / `TokenBudget` - 提示词与 token 预检
//! - `InferenceSubmitter` / `InferenceReconciler` - 提交与轮询对账
//! - `ResponseReconciler` / `FieldValidator` - 输出解析与格式校验
//! - `IntermediateStore` - 文档级中间结果
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一页"的完整处理流程
//! - `PageCtx` - 上下文封装（file_id + page）
//! - `PageFlow` - 流程编排（pending → submit → poll → reconcile → merge）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 阶段处理器，调度方入口
//! - `orchestrator/document_processor` - 单个文档，按页并发
//! - `orchestrator/batch_processor` - 批量文档，本地运行入口
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{DocumentResult, ExtractedField, FieldCatalog};
pub use orchestrator::{App, PipelineOrchestrator, Stage};
pub use workflow::{PageCtx, PageFlow};
