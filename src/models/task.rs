use std::sync::Arc;

use serde::Serialize;

use crate::models::exercise::ExerciseResponse;

/// 任务标识
///
/// 会话内单调递增，任务生命周期内保持不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

/// 图片载荷
///
/// 不可变的图片内容与声明的媒体类型。任务通过 `Arc` 独占持有；
/// 从会话中移除任务即丢弃会话侧引用，worker 在一次调用期间最多
/// 持有一个临时克隆。
#[derive(Debug)]
pub struct ImagePayload {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl ImagePayload {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }
}

/// 任务状态机
///
/// `Waiting → Analyzing → {Success, Error}`，`Error → Analyzing` 表示重新提交。
/// 结果和错误信息直接挂在对应状态上，保证"result/error 只在匹配状态下
/// 恰好存在一个"这一不变量在类型层面不可违反。
#[derive(Debug, Clone, Serialize)]
pub enum TaskStatus {
    /// 等待调度
    Waiting,
    /// 识别中
    Analyzing,
    /// 识别成功（携带归一化后的结果）
    Success(ExerciseResponse),
    /// 识别失败（携带可读的错误信息）
    Error(String),
}

impl TaskStatus {
    /// 是否可以被（重新）调度
    ///
    /// 只有 `Waiting` 和 `Error` 两种状态参与下一次运行。
    pub fn is_eligible(&self) -> bool {
        matches!(self, TaskStatus::Waiting | TaskStatus::Error(_))
    }

    pub fn is_analyzing(&self) -> bool {
        matches!(self, TaskStatus::Analyzing)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TaskStatus::Error(_))
    }

    /// 状态的中文标签（用于日志）
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "等待中",
            TaskStatus::Analyzing => "识别中",
            TaskStatus::Success(_) => "成功",
            TaskStatus::Error(_) => "失败",
        }
    }
}

/// 一张待识别或已识别的图片任务
#[derive(Debug)]
pub struct ImageTask {
    pub id: TaskId,
    /// 来源名称（文件名），用于日志和错误展示
    pub source_name: String,
    pub payload: Arc<ImagePayload>,
    pub status: TaskStatus,
}

impl ImageTask {
    pub fn new(id: TaskId, source_name: impl Into<String>, payload: ImagePayload) -> Self {
        Self {
            id,
            source_name: source_name.into(),
            payload: Arc::new(payload),
            status: TaskStatus::Waiting,
        }
    }

    /// 进入识别状态
    ///
    /// 只允许从 `Waiting` / `Error` 进入，返回是否真的发生了转移。
    pub fn begin_analysis(&mut self) -> bool {
        if self.status.is_eligible() {
            self.status = TaskStatus::Analyzing;
            true
        } else {
            false
        }
    }

    pub fn mark_success(&mut self, result: ExerciseResponse) {
        self.status = TaskStatus::Success(result);
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Error(message.into());
    }

    /// 生成对外快照（id + 来源 + 状态，不暴露载荷）
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            source_name: self.source_name.clone(),
            status: self.status.clone(),
        }
    }
}

/// 任务快照
///
/// 调用方可见的任务视图：id、状态、结果或错误。
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub source_name: String,
    pub status: TaskStatus,
}

/// 运行进度
///
/// 每次运行开始时重置，运行内单调不减。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// 完成百分比（0-100），total 为 0 时返回 0
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            0
        } else {
            ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
        }
    }
}

/// 一次运行的汇总统计
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    pub success: usize,
    pub failed: usize,
    pub total: usize,
}
