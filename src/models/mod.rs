//! 数据模型层
//!
//! 定义批次识别管线使用的全部数据结构：
//! - `task` - 任务、任务状态、进度计数
//! - `exercise` - 识别服务返回的结构化习题与分析选项

pub mod exercise;
pub mod task;

pub use exercise::{AnalysisOptions, ExerciseResponse};
pub use task::{ImagePayload, ImageTask, Progress, RunStats, TaskId, TaskSnapshot, TaskStatus};
