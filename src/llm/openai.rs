//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai（byot 模式，请求 / 响应为自定义 JSON）调用任意 OpenAI 兼容端点：
//! OpenAI、Azure OpenAI、DeepSeek、GitHub Models、Google、Mistral、Ollama。
//! 结构化输出统一走"强制函数调用"：schema 作为唯一工具下发，取其参数作为 parsed。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::{AzureConfig, Config, OpenAIConfig};
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    ChatRequest, ChatResponse, LlmClient, LlmError, Message, Provider, Role, Usage,
};
use crate::tools::ToolCall;

pub const GITHUB_BASE_URL: &str = "https://models.inference.ai.azure.com";
pub const GOOGLE_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, usage: &Usage) {
        self.prompt_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        self.total_tokens
            .fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn snapshot(&self) -> Usage {
        let (input_tokens, output_tokens, total_tokens) = self.get();
        Usage {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// OpenAI 兼容客户端：持有 Client、provider 与 model 名
pub struct OpenAiClient<C: Config = OpenAIConfig> {
    client: Client<C>,
    provider: Provider,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient<OpenAIConfig> {
    /// api_key 缺省时读取 OPENAI_API_KEY
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self::for_provider(Provider::Openai, base_url, model, api_key)
    }

    pub fn for_provider(
        provider: Provider,
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self::with_config(provider, config, model)
    }
}

impl OpenAiClient<AzureConfig> {
    /// Azure 部署名即模型名
    pub fn azure(endpoint: &str, api_version: &str, deployment: &str, api_key: &str) -> Self {
        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_version(api_version)
            .with_deployment_id(deployment)
            .with_api_key(api_key);
        Self::with_config(Provider::AzureOpenai, config, deployment)
    }
}

impl<C: Config> OpenAiClient<C> {
    pub fn with_config(provider: Provider, config: C, model: &str) -> Self {
        Self {
            client: Client::with_config(config),
            provider,
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 组装 chat/completions 请求体
    pub fn build_body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages.iter().map(to_wire_message).collect::<Vec<_>>(),
            "temperature": 0,
        });
        if self.provider == Provider::Openai {
            body["seed"] = json!(1);
        }

        if let Some(schema) = &request.output_schema {
            body["tools"] = json!([{
                "type": "function",
                "function": {
                    "name": schema.name,
                    "description": schema.description,
                    "parameters": schema.schema,
                }
            }]);
            body["tool_choice"] = json!({
                "type": "function",
                "function": { "name": schema.name },
            });
        } else if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
        }
        body
    }
}

fn to_wire_message(message: &Message) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    if message.images.is_empty() {
        return json!({ "role": role, "content": message.content });
    }
    let mut parts = vec![json!({ "type": "text", "text": message.content })];
    parts.extend(message.images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{image}") },
        })
    }));
    json!({ "role": role, "content": parts })
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek reasoner
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn parse_arguments(name: &str, arguments: &str) -> Result<Value, LlmError> {
    if arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(arguments)
        .map_err(|e| LlmError::InvalidResponse(format!("{name} arguments: {e}")))
}

fn into_chat_response(request: &ChatRequest, wire: WireResponse) -> Result<ChatResponse, LlmError> {
    let usage = wire
        .usage
        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
        .unwrap_or_default();
    let message = wire
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))?;

    let mut tool_calls = Vec::new();
    for call in message.tool_calls.unwrap_or_default() {
        let args = parse_arguments(&call.function.name, &call.function.arguments)?;
        tool_calls.push(ToolCall::new(call.function.name, args));
    }

    let content = message.content.unwrap_or_default();
    let parsed = match &request.output_schema {
        Some(schema) => tool_calls
            .iter()
            .find(|c| c.name == schema.name)
            .map(|c| c.args.clone())
            .or_else(|| serde_json::from_str::<Value>(content.trim()).ok()),
        None => None,
    };
    if request.output_schema.is_some() {
        tool_calls.clear();
    }

    Ok(ChatResponse {
        content,
        parsed,
        tool_calls,
        usage,
        reasoning: message.reasoning_content.filter(|r| !r.is_empty()),
    })
}

/// 按错误文本归类；DeepSeek 限流时返回 500，按过载处理
pub(crate) fn classify_error(provider: Provider, text: String) -> LlmError {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("429")
        || lowered.contains("rate limit")
        || lowered.contains("rate_limit")
        || lowered.contains("throttl")
    {
        LlmError::RateLimited(text)
    } else if lowered.contains("overloaded") || lowered.contains("529") {
        LlmError::Overloaded(text)
    } else if provider == Provider::Deepseek
        && (lowered.contains("500") || lowered.contains("internal server error"))
    {
        LlmError::Overloaded(text)
    } else if lowered.contains("error sending request") || lowered.contains("connection") {
        LlmError::Transport(text)
    } else {
        LlmError::Api {
            status: 0,
            message: text,
        }
    }
}

#[async_trait]
impl<C> LlmClient for OpenAiClient<C>
where
    C: Config + Send + Sync + 'static,
{
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.build_body(request);
        let wire: WireResponse = self
            .client
            .chat()
            .create_byot(body)
            .await
            .map_err(|e| classify_error(self.provider, e.to_string()))?;

        let response = into_chat_response(request, wire)?;
        self.usage.add(&response.usage);
        Ok(response)
    }

    fn llm_string(&self) -> String {
        format!("{}/{}?temperature=0", self.provider, self.model)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
