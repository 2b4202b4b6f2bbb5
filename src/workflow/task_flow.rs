//! 任务处理流程 - 流程层
//!
//! 核心职责：定义"一张图片"的完整处理流程
//!
//! 流程顺序：
//! 1. 图片编码（base64 data URL）
//! 2. 识别服务调用
//! 3. 正文归一化 + 白名单清洗

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tracing::{info, warn};

use crate::error::AppResult;
use crate::models::exercise::{AnalysisOptions, ExerciseResponse};
use crate::models::task::ImagePayload;
use crate::services::{ContentNormalizer, Recognizer};
use crate::utils::logging::truncate_text;
use crate::workflow::task_ctx::TaskCtx;

/// 单任务处理流程
///
/// - 编排一张图片从载荷到结构化习题的完整路径
/// - 不持有任务集合，不关心并发
/// - 只依赖业务能力（识别 / 归一化）
pub struct TaskFlow {
    recognizer: Arc<dyn Recognizer>,
    normalizer: ContentNormalizer,
    options: AnalysisOptions,
}

impl TaskFlow {
    /// 创建新的任务处理流程
    pub fn new(recognizer: Arc<dyn Recognizer>, options: AnalysisOptions) -> AppResult<Self> {
        Ok(Self {
            recognizer,
            normalizer: ContentNormalizer::new()?,
            options,
        })
    }

    /// 是否配置了识别服务凭证
    pub fn has_credential(&self) -> bool {
        self.recognizer.has_credential()
    }

    /// 处理一张图片
    ///
    /// 成功时返回正文已归一化、已清洗的结构化习题；
    /// 任何失败（网络、超时、响应形状）都原样向上传播，由调用方
    /// 落到对应任务的 Error 状态上，不影响兄弟任务。
    pub async fn run(&self, payload: &ImagePayload, ctx: &TaskCtx) -> AppResult<ExerciseResponse> {
        info!(
            "[任务 {}] 📤 提交识别: {} ({} 字节, {})",
            ctx.task_id,
            truncate_text(&ctx.source_name, 40),
            payload.data.len(),
            payload.media_type
        );

        let encoded = BASE64.encode(&payload.data);

        let mut response = self
            .recognizer
            .analyze(&encoded, &payload.media_type, &self.options)
            .await
            .map_err(|e| {
                warn!("[任务 {}] ⚠️ 识别失败: {}", ctx.task_id, e);
                e
            })?;

        // 归一化只作用于正文；标题和关键词按服务返回原样保留
        response.content = self.normalizer.clean(&response.content);

        info!(
            "[任务 {}] ✓ 识别成功: 《{}》难度 {}/5",
            ctx.task_id,
            truncate_text(&response.title, 30),
            response.difficulty
        );

        Ok(response)
    }
}
