//! 流程层（Workflow Layer）
//!
//! 定义"一张图片"的完整处理流程：识别 → 归一化。
//! 本层不持有任务集合，也不做并发调度，那些是编排层的职责。

pub mod task_ctx;
pub mod task_flow;

pub use task_ctx::TaskCtx;
pub use task_flow::TaskFlow;
