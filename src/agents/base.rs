//! 代理公共部分：模板、LLM 调用、推理日志与用量累计

use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;

use crate::agents::{AgentKind, Prompts};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, Provider, Usage};

pub struct AgentCore {
    kind: AgentKind,
    llm: Arc<dyn LlmClient>,
    prompts: Prompts,
    usage: Mutex<Usage>,
}

impl AgentCore {
    pub fn new(kind: AgentKind, llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            kind,
            llm,
            prompts: Prompts::new(kind, provider),
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// 累计用量（含缓存命中的响应）
    pub fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    pub async fn invoke(&self, request: ChatRequest) -> Result<ChatResponse, AlumniumError> {
        let response = self.llm.complete(&request).await?;
        if let Some(reasoning) = &response.reasoning {
            tracing::info!(agent = %self.kind, "  <- Reasoning: {}", reasoning);
        }
        if let Ok(mut usage) = self.usage.lock() {
            usage.add(&response.usage);
        }
        tracing::info!(
            agent = %self.kind,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "  <- Usage"
        );
        Ok(response)
    }
}

/// 取结构化输出：优先 parsed，其次把 content 当 JSON 解析
pub fn structured<T: DeserializeOwned>(
    kind: AgentKind,
    response: &ChatResponse,
) -> Result<T, AlumniumError> {
    let value = match &response.parsed {
        Some(value) => value.clone(),
        None => serde_json::from_str(strip_code_fence(&response.content)).map_err(|e| {
            AlumniumError::StructuredOutput(format!("{kind}: no structured output ({e})"))
        })?,
    };
    serde_json::from_value(value)
        .map_err(|e| AlumniumError::StructuredOutput(format!("{kind}: {e}")))
}

/// 去掉 ```json ... ``` 包裹
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, MockLlmClient};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: String,
    }

    #[test]
    fn test_structured_from_fenced_content() {
        let response = ChatResponse::text("```json\n{\"value\": \"7\"}\n```");
        let answer: Answer = structured(AgentKind::Retriever, &response).unwrap();
        assert_eq!(answer.value, "7");
    }

    #[test]
    fn test_structured_missing() {
        let response = ChatResponse::text("I cannot tell");
        let err = structured::<Answer>(AgentKind::Retriever, &response).unwrap_err();
        assert!(matches!(err, AlumniumError::StructuredOutput(_)));
    }

    #[tokio::test]
    async fn test_usage_accumulates() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push(Ok(ChatResponse::text("a").with_usage(Usage::new(3, 1))));
        mock.push(Ok(ChatResponse::text("b").with_usage(Usage::new(5, 2))));
        let core = AgentCore::new(AgentKind::Planner, mock, Provider::Openai);
        for _ in 0..2 {
            let request = ChatRequest::new(AgentKind::Planner, vec![Message::user("x")]);
            core.invoke(request).await.unwrap();
        }
        assert_eq!(core.usage(), Usage::new(8, 3));
    }
}
