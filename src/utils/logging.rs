//! 日志工具模块

use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// 优先读取 `RUST_LOG` 环境变量，未设置时按 `verbose` 落到
/// `debug` 或 `info` 级别。
pub fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// 截断文本用于日志展示
///
/// 按字符数截断，超长时追加省略号。
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
