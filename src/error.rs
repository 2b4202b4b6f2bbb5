use std::fmt;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 识别服务调用错误
    Recognition(RecognitionError),
    /// 凭证错误
    Credential(CredentialError),
    /// 批次会话错误
    Session(SessionError),
    /// 文件操作错误
    File(FileError),
    /// 配置错误
    Config(ConfigError),
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Recognition(e) => write!(f, "识别错误: {}", e),
            AppError::Credential(e) => write!(f, "凭证错误: {}", e),
            AppError::Session(e) => write!(f, "会话错误: {}", e),
            AppError::File(e) => write!(f, "文件错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Recognition(e) => Some(e),
            AppError::Credential(e) => Some(e),
            AppError::Session(e) => Some(e),
            AppError::File(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Other(_) => None,
        }
    }
}

/// 识别服务调用错误
///
/// 覆盖网络失败、响应为空、响应形状不符合约定三类情况。
/// 这类错误只影响单个任务，不会中止整批处理。
#[derive(Debug)]
pub enum RecognitionError {
    /// 网络请求失败
    RequestFailed {
        model: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务返回结果为空
    EmptyResponse {
        model: String,
    },
    /// 服务返回内容为空
    EmptyContent {
        model: String,
    },
    /// JSON 解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 响应形状不符合约定（标题/难度/关键词/内容）
    MalformedResponse {
        reason: String,
    },
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::RequestFailed { model, source } => {
                write!(f, "识别服务调用失败 (模型: {}): {}", model, source)
            }
            RecognitionError::EmptyResponse { model } => {
                write!(f, "识别服务返回结果为空 (模型: {})", model)
            }
            RecognitionError::EmptyContent { model } => {
                write!(f, "识别服务返回内容为空 (模型: {})", model)
            }
            RecognitionError::JsonParseFailed { source } => {
                write!(f, "JSON解析失败: {}", source)
            }
            RecognitionError::MalformedResponse { reason } => {
                write!(f, "识别结果形状不符合约定: {}", reason)
            }
        }
    }
}

impl std::error::Error for RecognitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecognitionError::RequestFailed { source, .. }
            | RecognitionError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 凭证错误
///
/// 凭证错误会阻止整次运行的启动，只向调用方暴露一次，不自动重试。
#[derive(Debug)]
pub enum CredentialError {
    /// 未配置凭证
    Missing,
    /// 凭证校验未通过
    Invalid,
    /// 凭证校验过程本身失败（网络等）
    VerifyFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Missing => write!(f, "未配置 API 凭证"),
            CredentialError::Invalid => write!(f, "API 凭证校验未通过"),
            CredentialError::VerifyFailed { source } => {
                write!(f, "凭证校验失败: {}", source)
            }
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CredentialError::VerifyFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 批次会话错误
///
/// 会话层自身的错误，与单个任务的失败无关。
#[derive(Debug)]
pub enum SessionError {
    /// 已有一次运行在进行中
    RunInProgress,
    /// 并发数配置非法（必须为正整数）
    InvalidConcurrency {
        value: usize,
    },
    /// 工作协程异常退出（panic 或被运行时取消）
    WorkerPanicked {
        detail: String,
    },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::RunInProgress => {
                write!(f, "当前会话已有一次运行在进行中")
            }
            SessionError::InvalidConcurrency { value } => {
                write!(f, "并发数必须为正整数，当前值: {}", value)
            }
            SessionError::WorkerPanicked { detail } => {
                write!(f, "工作协程异常退出: {}", detail)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// 文件操作错误
#[derive(Debug)]
pub enum FileError {
    /// 目录不存在
    DirectoryNotFound {
        path: String,
    },
    /// 读取文件失败
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 不支持的图片类型
    UnsupportedImageType {
        path: String,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::DirectoryNotFound { path } => write!(f, "目录不存在: {}", path),
            FileError::ReadFailed { path, source } => {
                write!(f, "读取文件失败 ({}): {}", path, source)
            }
            FileError::UnsupportedImageType { path } => {
                write!(f, "不支持的图片类型: {}", path)
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::ReadFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 正则模式编译失败
    PatternCompileFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
            ConfigError::PatternCompileFailed { source } => {
                write!(f, "正则模式编译失败: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::PatternCompileFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

// ========== 从常见错误类型转换 ==========
// 注意：不需要手动实现 From<AppError> for anyhow::Error，
// 因为 anyhow 已经为所有实现了 std::error::Error 的类型提供了自动实现

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Recognition(RecognitionError::JsonParseFailed {
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        AppError::Config(ConfigError::PatternCompileFailed {
            source: Box::new(err),
        })
    }
}

impl From<async_openai::error::OpenAIError> for AppError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        AppError::Recognition(RecognitionError::RequestFailed {
            model: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建识别服务调用错误
    pub fn recognition_failed(
        model: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Recognition(RecognitionError::RequestFailed {
            model: model.into(),
            source: Box::new(source),
        })
    }

    /// 创建响应形状错误
    pub fn malformed_response(reason: impl Into<String>) -> Self {
        AppError::Recognition(RecognitionError::MalformedResponse {
            reason: reason.into(),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建工作协程异常错误
    pub fn worker_panicked(detail: impl Into<String>) -> Self {
        AppError::Session(SessionError::WorkerPanicked {
            detail: detail.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
