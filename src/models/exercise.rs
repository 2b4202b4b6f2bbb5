use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 识别服务返回的结构化习题
///
/// 对应服务约定的 JSON 形状：标题、难度（1-5）、关键词（3-5 个）、
/// 带数学标记的 HTML 正文。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseResponse {
    pub title: String,
    pub difficulty: u8,
    pub keywords: Vec<String>,
    pub content: String,
}

impl ExerciseResponse {
    /// 校验响应形状是否符合服务约定
    ///
    /// 不符合约定的响应与网络错误同等对待：只影响当前任务。
    pub fn validate(&self) -> AppResult<()> {
        if self.title.trim().is_empty() {
            return Err(AppError::malformed_response("标题为空"));
        }
        if self.content.trim().is_empty() {
            return Err(AppError::malformed_response("正文为空"));
        }
        if !(1..=5).contains(&self.difficulty) {
            return Err(AppError::malformed_response(format!(
                "难度 {} 超出 1-5 范围",
                self.difficulty
            )));
        }
        if !(3..=5).contains(&self.keywords.len()) {
            return Err(AppError::malformed_response(format!(
                "关键词数量 {} 不在 3-5 范围内",
                self.keywords.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for ExerciseResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 截断正文以便显示（最多80个字符）
        let content_preview = if self.content.chars().count() > 80 {
            self.content.chars().take(80).collect::<String>() + "..."
        } else {
            self.content.clone()
        };
        write!(
            f,
            "《{}》难度 {}/5 [{}] {}",
            self.title,
            self.difficulty,
            self.keywords.join(", "),
            content_preview
        )
    }
}

/// 分析选项
///
/// 一次运行内所有任务共享的不可变选项，只影响发给识别服务的指令，
/// 不影响归一化器的行为。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// 是否让服务润色文字（否则要求逐字转录）
    pub revise_text: bool,
    /// 是否在正文中加粗关键词
    pub bold_keywords: bool,
    /// 是否为每个小题附加提示
    pub suggest_hints: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            revise_text: false,
            bold_keywords: true,
            suggest_hints: false,
        }
    }
}

impl AnalysisOptions {
    /// 从配置读取默认选项
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            revise_text: config.revise_text,
            bold_keywords: config.bold_keywords,
            suggest_hints: config.suggest_hints,
        }
    }
}
