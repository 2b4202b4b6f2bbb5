use crate::models::task::TaskId;

/// 任务上下文
///
/// 封装流程层需要的任务标识信息，主要用于日志前缀。
#[derive(Debug, Clone)]
pub struct TaskCtx {
    pub task_id: TaskId,
    /// 来源名称（文件名）
    pub source_name: String,
}

impl TaskCtx {
    pub fn new(task_id: TaskId, source_name: impl Into<String>) -> Self {
        Self {
            task_id,
            source_name: source_name.into(),
        }
    }
}
