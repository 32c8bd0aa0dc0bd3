//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Anthropic / Mock）实现 LlmClient：一次 complete 调用，
//! 按请求返回纯文本、结构化输出（output_schema）或工具调用（tools）。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::agents::AgentKind;
use crate::tools::{parameters_schema, ToolCall};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 对话消息；images 为 base64 PNG，仅 User 消息使用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, base64_png: impl Into<String>) -> Self {
        self.images.push(base64_png.into());
        self
    }
}

/// 结构化输出约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl OutputSchema {
    pub fn of<T: JsonSchema>(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            schema: parameters_schema::<T>(),
        }
    }
}

/// 单次 LLM 请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// 发起请求的代理，决定缓存目录
    pub agent: AgentKind,
    pub messages: Vec<Message>,
    pub output_schema: Option<OutputSchema>,
    /// OpenAI function 格式的工具 schema
    pub tools: Vec<Value>,
}

impl ChatRequest {
    pub fn new(agent: AgentKind, messages: Vec<Message>) -> Self {
        Self {
            agent,
            messages,
            output_schema: None,
            tools: Vec::new(),
        }
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }

    /// 缓存键用的提示文本：消息、schema 与工具的 JSON
    pub fn prompt_key(&self) -> String {
        json!({
            "messages": self.messages,
            "output_schema": self.output_schema,
            "tools": self.tools,
        })
        .to_string()
    }

    /// 最后一条 User 消息（few-shot 示例在它之前）
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// LLM 响应；缓存中按此结构序列化
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub content: String,
    /// 结构化输出（请求带 output_schema 时）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: Usage,
    /// 推理内容，仅记录日志
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn structured(parsed: Value) -> Self {
        Self {
            content: parsed.to_string(),
            parsed: Some(parsed),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// LLM 层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider overloaded: {0}")]
    Overloaded(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

impl LlmError {
    /// 限流 / 过载类错误可退避重试，其余直接抛出
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited(_) | LlmError::Overloaded(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status == 529,
            _ => false,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// 模型标识（provider/model 与参数），进入缓存键
    fn llm_string(&self) -> String;

    /// 累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimited("429".into()).is_retryable());
        assert!(LlmError::Overloaded("busy".into()).is_retryable());
        assert!(LlmError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!LlmError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn test_last_user_message_skips_examples() {
        let request = ChatRequest::new(
            AgentKind::Planner,
            vec![
                Message::system("sys"),
                Message::user("example goal"),
                Message::assistant("example steps"),
                Message::user("real goal"),
            ],
        );
        assert_eq!(request.last_user_message(), Some("real goal"));
    }

    #[test]
    fn test_prompt_key_changes_with_tools() {
        let base = ChatRequest::new(AgentKind::Actor, vec![Message::user("x")]);
        let with_tools = base.clone().with_tools(vec![json!({"type": "function"})]);
        assert_ne!(base.prompt_key(), with_tools.prompt_key());
    }

    #[test]
    fn test_response_roundtrip_skips_empty_fields() {
        let response = ChatResponse::text("hello").with_usage(Usage::new(3, 2));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["usage"]["total_tokens"], 5);
        let back: ChatResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
