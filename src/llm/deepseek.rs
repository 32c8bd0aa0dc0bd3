//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话), deepseek-reasoner (思考模式，reasoning_content 只记录日志)
//! - 限流时返回 500 而非 429，重试归类见 `openai::classify_error`

use crate::llm::{LlmError, OpenAiClient, Provider};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端，密钥取自 `DEEPSEEK_API_KEY`
pub fn create_deepseek_client(model: Option<&str>) -> Result<OpenAiClient, LlmError> {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .map_err(|_| LlmError::MissingCredentials("DEEPSEEK_API_KEY".to_string()))?;
    let model = model.unwrap_or(DEEPSEEK_CHAT);

    Ok(OpenAiClient::for_provider(
        Provider::Deepseek,
        Some(DEEPSEEK_BASE_URL),
        model,
        Some(api_key.as_str()),
    ))
}
