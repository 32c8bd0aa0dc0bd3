//! Anthropic Messages API 客户端（reqwest）
//!
//! 结构化输出通过 `tool_choice = {type: tool}` 强制调用 schema 工具实现；
//! thinking 块写入 reasoning，仅记录日志。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::openai::TokenUsage;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError, Message, Role, Usage};
use crate::tools::ToolCall;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    pub usage: TokenUsage,
}

impl AnthropicClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    /// 密钥取自 `ANTHROPIC_API_KEY`
    pub fn from_env(model: &str) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingCredentials("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self::new(None, model, &api_key))
    }

    pub fn build_body(&self, request: &ChatRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(to_wire_message)
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        if let Some(schema) = &request.output_schema {
            body["tools"] = json!([{
                "name": schema.name,
                "description": schema.description,
                "input_schema": schema.schema,
            }]);
            body["tool_choice"] = json!({ "type": "tool", "name": schema.name });
        } else if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(to_anthropic_tool).collect());
        }
        body
    }
}

fn to_wire_message(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };
    let mut content = vec![json!({ "type": "text", "text": message.content })];
    content.extend(message.images.iter().map(|image| {
        json!({
            "type": "image",
            "source": { "type": "base64", "media_type": "image/png", "data": image },
        })
    }));
    json!({ "role": role, "content": content })
}

/// OpenAI function 格式 → Anthropic tool 格式
fn to_anthropic_tool(tool: &Value) -> Value {
    let function = tool.get("function").unwrap_or(tool);
    json!({
        "name": function.get("name").cloned().unwrap_or(Value::Null),
        "description": function.get("description").cloned().unwrap_or(json!("")),
        "input_schema": function
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    })
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn status_error(status: u16, message: String) -> LlmError {
    match status {
        429 => LlmError::RateLimited(message),
        529 => LlmError::Overloaded(message),
        _ => LlmError::Api { status, message },
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = self.build_body(request);
        let resp = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), text));
        }
        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let mut response = ChatResponse {
            usage: wire
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
            ..ChatResponse::default()
        };
        let mut texts = Vec::new();
        let mut thinking = Vec::new();
        for block in wire.content {
            match block {
                WireBlock::Text { text } => texts.push(text),
                WireBlock::ToolUse { name, input } => {
                    response.tool_calls.push(ToolCall::new(name, input));
                }
                WireBlock::Thinking { thinking: t } => thinking.push(t),
                WireBlock::Other => {}
            }
        }
        response.content = texts.join("");
        if !thinking.is_empty() {
            response.reasoning = Some(thinking.join("\n"));
        }

        if let Some(schema) = &request.output_schema {
            response.parsed = response
                .tool_calls
                .iter()
                .find(|c| c.name == schema.name)
                .map(|c| c.args.clone());
            // 结构化输出缺失时保留工具调用，交给代理兜底
            if response.parsed.is_some() {
                response.tool_calls.clear();
            }
        }

        self.usage.add(&response.usage);
        Ok(response)
    }

    fn llm_string(&self) -> String {
        format!("anthropic/{}?temperature=0", self.model)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
