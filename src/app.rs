use std::path::Path;
use std::sync::Arc;

use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, CredentialError, FileError};
use crate::models::exercise::AnalysisOptions;
use crate::models::task::{ImagePayload, RunStats, TaskStatus};
use crate::orchestrator::BatchSession;
use crate::services::{RecognitionService, Recognizer};
use crate::workflow::TaskFlow;

/// 应用主结构
pub struct App {
    config: Config,
    session: BatchSession,
}

impl App {
    /// 初始化应用
    ///
    /// 凭证只在这里校验一次，校验不通过直接拒绝启动。
    pub async fn initialize(config: Config) -> AppResult<Self> {
        log_startup(&config);

        let recognizer = RecognitionService::new(&config);
        if !recognizer.has_credential() {
            return Err(AppError::Credential(CredentialError::Missing));
        }

        info!("🔑 正在校验 API 凭证...");
        if !recognizer.verify_credential().await? {
            return Err(AppError::Credential(CredentialError::Invalid));
        }
        info!("✓ 凭证校验通过");

        let options = AnalysisOptions::from_config(&config);
        let flow = TaskFlow::new(Arc::new(recognizer), options)?;
        let session = BatchSession::new(flow, config.concurrency_limit)?;

        Ok(Self { config, session })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> AppResult<()> {
        let added = self.load_images().await?;

        if added == 0 {
            warn!("⚠️ 没有找到待识别的图片，程序结束");
            return Ok(());
        }
        info!("✓ 找到 {} 张待识别的图片", added);

        if !self.config.auto_start_on_submit {
            info!("ℹ️ 自动开始已关闭，任务保持等待状态");
            return Ok(());
        }

        let stats = self.session.run().await?;

        self.print_task_outcomes();
        print_final_stats(&stats);

        Ok(())
    }

    /// 扫描图片目录并把每张图片登记为一个任务
    ///
    /// 扩展名不在支持列表里的文件直接跳过，不视为错误。
    async fn load_images(&self) -> AppResult<usize> {
        let folder = Path::new(&self.config.image_folder);
        if !folder.is_dir() {
            return Err(AppError::File(FileError::DirectoryNotFound {
                path: self.config.image_folder.clone(),
            }));
        }
        info!("📁 正在扫描图片目录: {}", self.config.image_folder);

        let mut entries = fs::read_dir(folder).await?;
        let mut batch = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let media_type = match path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(media_type_for_extension)
            {
                Some(t) => t,
                None => continue,
            };

            let data = fs::read(&path)
                .await
                .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());

            batch.push((name, ImagePayload::new(data, media_type)));
        }

        // 文件名排序保证任务顺序稳定，与目录遍历顺序无关
        batch.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(self.session.add_tasks(batch).len())
    }

    fn print_task_outcomes(&self) {
        for snap in self.session.snapshots() {
            match &snap.status {
                TaskStatus::Success(result) => {
                    info!("✅ {}: 《{}》难度 {}/5", snap.source_name, result.title, result.difficulty);
                }
                TaskStatus::Error(msg) => {
                    warn!("❌ {}: {}", snap.source_name, msg);
                }
                other => {
                    info!("⏸ {}: {}", snap.source_name, other.label());
                }
            }
        }
    }
}

/// 扩展名到媒体类型的映射，大小写不敏感
fn media_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

// ========== 日志辅助函数 ==========

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 图片习题批量识别模式");
    info!("📊 并发上限: {}", config.concurrency_limit);
    info!("🤖 识别模型: {}", config.llm_model_name);
    info!("{}", "=".repeat(60));
}

fn print_final_stats(stats: &RunStats) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", stats.success, stats.total);
    info!("❌ 失败: {}", stats.failed);
    info!("{}", "=".repeat(60));
}
