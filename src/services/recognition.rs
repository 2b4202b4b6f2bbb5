//! 图片识别服务 - 业务能力层
//!
//! 只负责"把一张习题图片交给识别服务、拿回结构化结果"这一件事，
//! 不关心任务调度，也不出现 Vec<ImageTask>。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的视觉服务（如 Gemini 的 OpenAI 兼容端点）
//! - 图片以 base64 data URL 形式随消息发送

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, RecognitionError};
use crate::models::exercise::{AnalysisOptions, ExerciseResponse};

/// 识别服务能力抽象
///
/// 批次会话只依赖这个 trait，因此可以在测试里注入可控的假实现。
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// 是否配置了凭证（同步、不发网络请求）
    fn has_credential(&self) -> bool;

    /// 轻量凭证校验
    ///
    /// 发起一次最小请求确认凭证可用，对任务状态没有任何副作用。
    async fn verify_credential(&self) -> AppResult<bool>;

    /// 识别一张图片，返回结构化习题
    async fn analyze(
        &self,
        image_base64: &str,
        media_type: &str,
        options: &AnalysisOptions,
    ) -> AppResult<ExerciseResponse>;
}

/// 基于 OpenAI 兼容端点的识别服务
pub struct RecognitionService {
    client: Client<OpenAIConfig>,
    model_name: String,
    verify_model_name: String,
    has_key: bool,
}

impl RecognitionService {
    /// 创建新的识别服务
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            verify_model_name: config.verify_model_name.clone(),
            has_key: !config.llm_api_key.trim().is_empty(),
        }
    }

    /// 构建发给识别服务的系统指令
    ///
    /// 固定部分约定输出形状（标题 / 难度 / 关键词 / HTML 正文 + LaTeX），
    /// 可变部分由分析选项决定。
    fn build_system_instructions(options: &AnalysisOptions) -> String {
        let mut instructions = vec![
            "You are an expert in mathematics education. Your task is to analyze the content of a math exercise image and extract it into a structured JSON object with exactly these fields: \"title\" (string), \"difficulty\" (integer), \"keywords\" (array of strings), \"content\" (string). Return ONLY the JSON object, no surrounding prose.".to_string(),
            "The 'content' field must contain ONLY the body of the exercise. Omit any headers like 'Exercise 1', 'Problem A', etc., as the application will handle numbering automatically.".to_string(),
            "The 'title' MUST be a short, pedagogical summary of the exercise's main objective (e.g., 'Solving Quadratic Equations', 'Vector Dot Product'), under 6 words.".to_string(),
            "The 'difficulty' is an estimated difficulty from 1 (very easy) to 5 (very hard). The 'keywords' array holds 3-5 relevant mathematical keywords.".to_string(),
            "IMPORTANT: Detect the language of the text in the image. Your entire response (title, keywords, content) MUST be in that same language. DO NOT TRANSLATE.".to_string(),
            "The 'content' field must be valid, semantic HTML. Use <p> for paragraphs, and nested <ol> or <ul> for lists. All math must be LaTeX, using \\( ... \\) for inline and \\[ ... \\] for display math.".to_string(),
            "For any inline math that contains complex structures like fractions (\\frac), summations (\\sum), or integrals (\\int), add \\displaystyle at the beginning of the formula's content. Apply this only to complex formulas.".to_string(),
            "For vectors, consistently use \\vec{u} for single-letter vectors and \\overrightarrow{AB} for vectors over multiple letters. For systems of equations use the cases or aligned environments; for matrices use pmatrix or bmatrix. Use \\left and \\right for delimiters around tall expressions.".to_string(),
        ];

        if options.revise_text {
            instructions.push(
                "Analyze the text for spelling and grammar errors. In the 'content' field, provide a corrected version of the text. The corrections should be subtle and preserve the original meaning.".to_string(),
            );
        } else {
            instructions.push(
                "Your transcription must be exact. DO NOT correct or alter the original text, spelling, or grammar. Preserve the original phrasing and vocabulary.".to_string(),
            );
        }

        if options.bold_keywords {
            instructions.push(
                "In the HTML 'content' field, bold the keywords you've identified (from the 'keywords' array) by wrapping them in <strong> tags.".to_string(),
            );
        }

        if options.suggest_hints {
            instructions.push(
                "For each question or sub-question that requires a solution, add a brief, helpful hint in parentheses at the end of the question's text. The hint should guide the student without giving away the answer. Do not add hints to simple instructions or statements.".to_string(),
            );
        }

        instructions.join(" ")
    }

    /// 解析识别服务返回的原始文本
    ///
    /// 容忍包在 markdown 围栏里的 JSON；其余形状问题一律按
    /// malformed-response 处理（与网络错误同级，只影响当前任务）。
    fn parse_response(raw: &str) -> AppResult<ExerciseResponse> {
        let json_text = strip_json_fences(raw);
        let response: ExerciseResponse = serde_json::from_str(json_text)?;
        response.validate()?;
        Ok(response)
    }
}

#[async_trait]
impl Recognizer for RecognitionService {
    fn has_credential(&self) -> bool {
        self.has_key
    }

    async fn verify_credential(&self) -> AppResult<bool> {
        if !self.has_key {
            return Ok(false);
        }

        debug!("正在校验 API 凭证，模型: {}", self.verify_model_name);

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content("ping")
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.verify_model_name)
            .messages(vec![ChatCompletionRequestMessage::User(user_msg)])
            .max_tokens(1u32)
            .build()?;

        match self.client.chat().create(request).await {
            Ok(response) => Ok(!response.choices.is_empty()),
            Err(e) => {
                warn!("凭证校验请求失败: {}", e);
                Ok(false)
            }
        }
    }

    async fn analyze(
        &self,
        image_base64: &str,
        media_type: &str,
        options: &AnalysisOptions,
    ) -> AppResult<ExerciseResponse> {
        debug!("调用识别服务，模型: {}", self.model_name);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(Self::build_system_instructions(options))
            .build()?;

        // 文本 + 图片（data URL）的多部分用户消息
        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: "Extract the exercise from this image as a JSON object.".to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{}", media_type, image_base64),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.3)
            .max_tokens(4096u32)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("识别服务调用失败: {}", e);
            AppError::recognition_failed(&self.model_name, e)
        })?;

        let choice = response.choices.first().ok_or_else(|| {
            AppError::Recognition(RecognitionError::EmptyResponse {
                model: self.model_name.clone(),
            })
        })?;

        let content = choice.message.content.clone().ok_or_else(|| {
            AppError::Recognition(RecognitionError::EmptyContent {
                model: self.model_name.clone(),
            })
        })?;

        debug!("识别服务调用成功，响应长度: {} 字符", content.len());

        Self::parse_response(&content)
    }
}

/// 去掉包裹 JSON 的 markdown 围栏
fn strip_json_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // 跳过围栏行上的语言标记（```json 等）
    let inner = match inner.find('\n') {
        Some(pos) => &inner[pos + 1..],
        None => inner,
    };
    inner.trim_end().strip_suffix("```").unwrap_or(inner).trim()
}
