//! 基础设施层
//!
//! 持有外部资源（存储、模型端点、光栅化进程），只暴露能力，不认识流水线阶段。

pub mod document_store;
pub mod model_endpoint;
pub mod object_store;
pub mod rasterizer;

pub use document_store::{DocumentStore, ObjectDocumentStore};
pub use model_endpoint::{AsyncInvocation, AsyncInvocationAck, ModelEndpoint, OpenAiEndpoint};
pub use object_store::{ArtifactLocation, LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use rasterizer::{PageImage, PageRasterizer, PdftoppmRasterizer};
