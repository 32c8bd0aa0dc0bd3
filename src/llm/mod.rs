//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Anthropic / DeepSeek / Mock），限流重试与缓存包装

pub mod anthropic;
pub mod cached;
pub mod deepseek;
pub mod factory;
pub mod mock;
pub mod model;
pub mod openai;
pub mod retry;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use cached::CachedLlmClient;
pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use factory::{create_llm, create_raw_llm};
pub use mock::MockLlmClient;
pub use model::{Model, Provider};
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{
    ChatRequest, ChatResponse, LlmClient, LlmError, Message, OutputSchema, Role, Usage,
};
