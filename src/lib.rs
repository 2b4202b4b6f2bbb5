//! # Image Exercise Ingest
//!
//! 一个批量识别习题图片并生成结构化内容的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 模型层（Models）
//! - `models/` - 纯数据类型，不含 IO
//! - `ExerciseResponse` - 结构化习题（标题 / 难度 / 关键词 / 正文）
//! - `ImageTask` - 任务状态机（等待 → 识别中 → 成功 / 失败）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个任务
//! - `RecognitionService` - 图片识别能力（视觉模型协作方）
//! - `ContentNormalizer` - 正文编号归一化能力
//! - `Sanitizer` - HTML 白名单清洗能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张图片"的完整处理流程
//! - `TaskCtx` - 上下文封装（任务 id + 来源名称）
//! - `TaskFlow` - 流程编排（编码 → 识别 → 归一化）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_session` - 批次会话，管理任务集合与并发调度
//!
//! ## 模块结构

pub mod app;
pub mod config;
pub mod error;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::exercise::{AnalysisOptions, ExerciseResponse};
pub use models::task::{ImagePayload, Progress, RunStats, TaskId, TaskSnapshot, TaskStatus};
pub use orchestrator::BatchSession;
pub use services::{ContentNormalizer, RecognitionService, Recognizer, Sanitizer};
pub use workflow::{TaskCtx, TaskFlow};
