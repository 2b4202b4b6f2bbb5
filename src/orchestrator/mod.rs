//! 编排层（Orchestrator Layer）
//!
//! 核心职责：管理任务集合与并发调度
//!
//! - 持有任务列表与运行状态（进度、取消标记）
//! - 一次运行内启动固定数量的 worker，从共享队列领取任务
//! - 单个任务失败只落到该任务上，不影响整批

pub mod batch_session;

pub use batch_session::BatchSession;
