/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时向识别服务发起的请求数量（worker 数量硬上限）
    pub concurrency_limit: usize,
    /// 待识别图片所在目录
    pub image_folder: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 添加任务后是否自动开始识别
    ///
    /// 这是调用方（UI/CLI）的策略开关，BatchSession 本身不读取它。
    pub auto_start_on_submit: bool,
    // --- 识别服务配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 凭证校验用的轻量模型
    pub verify_model_name: String,
    // --- 分析选项默认值 ---
    pub revise_text: bool,
    pub bold_keywords: bool,
    pub suggest_hints: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency_limit: 3,
            image_folder: "input_images".to_string(),
            verbose_logging: false,
            auto_start_on_submit: true,
            llm_api_key: String::new(),
            llm_api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            llm_model_name: "gemini-2.5-flash".to_string(),
            verify_model_name: "gemini-2.5-flash-lite".to_string(),
            revise_text: false,
            bold_keywords: true,
            suggest_hints: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            concurrency_limit: std::env::var("CONCURRENCY_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.concurrency_limit),
            image_folder: std::env::var("IMAGE_FOLDER").unwrap_or(default.image_folder),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            auto_start_on_submit: std::env::var("AUTO_START_ON_SUBMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.auto_start_on_submit),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            verify_model_name: std::env::var("VERIFY_MODEL_NAME").unwrap_or(default.verify_model_name),
            revise_text: std::env::var("REVISE_TEXT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.revise_text),
            bold_keywords: std::env::var("BOLD_KEYWORDS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.bold_keywords),
            suggest_hints: std::env::var("SUGGEST_HINTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.suggest_hints),
        }
    }
}
