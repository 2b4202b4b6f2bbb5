//! 工具层（Utils Layer）
//!
//! 与业务无关的基础设施：日志初始化与文本辅助函数。

pub mod logging;
