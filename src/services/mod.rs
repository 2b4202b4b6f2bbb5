//! 业务能力层（Services Layer）
//!
//! 描述"我能做什么"，只处理单个任务相关的能力，不关心调度流程：
//! - `recognition` - 图片识别能力（外部服务协作方）
//! - `normalizer` - 正文编号归一化能力
//! - `sanitizer` - HTML 白名单清洗能力（安全边界）

pub mod normalizer;
pub mod recognition;
pub mod sanitizer;

pub use normalizer::ContentNormalizer;
pub use recognition::{RecognitionService, Recognizer};
pub use sanitizer::Sanitizer;
