//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预置响应：先查该代理的专属队列，再查公共队列；队列耗尽时返回 InvalidResponse。
//! 所有请求都会被记录，便于断言提示内容。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::AgentKind;
use crate::llm::openai::TokenUsage;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};
use crate::tools::ToolCall;

type Scripted = Result<ChatResponse, LlmError>;

#[derive(Default)]
pub struct MockLlmClient {
    shared: Mutex<VecDeque<Scripted>>,
    per_agent: Mutex<HashMap<AgentKind, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    usage: TokenUsage,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Scripted) {
        if let Ok(mut queue) = self.shared.lock() {
            queue.push_back(result);
        }
    }

    pub fn push_text(&self, content: &str) {
        self.push(Ok(ChatResponse::text(content)));
    }

    pub fn push_error(&self, error: LlmError) {
        self.push(Err(error));
    }

    pub fn push_for(&self, agent: AgentKind, response: ChatResponse) {
        if let Ok(mut queues) = self.per_agent.lock() {
            queues.entry(agent).or_default().push_back(Ok(response));
        }
    }

    pub fn push_text_for(&self, agent: AgentKind, content: &str) {
        self.push_for(agent, ChatResponse::text(content));
    }

    pub fn push_structured_for(&self, agent: AgentKind, parsed: Value) {
        self.push_for(agent, ChatResponse::structured(parsed));
    }

    pub fn push_tool_calls_for(&self, agent: AgentKind, calls: Vec<ToolCall>) {
        self.push_for(agent, ChatResponse::with_tool_calls(calls));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, agent: AgentKind) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.agent == agent)
            .collect()
    }

    fn next(&self, agent: AgentKind) -> Option<Scripted> {
        let from_agent = self
            .per_agent
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(&agent).and_then(VecDeque::pop_front));
        from_agent.or_else(|| self.shared.lock().ok().and_then(|mut q| q.pop_front()))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let response = self.next(request.agent).unwrap_or_else(|| {
            Err(LlmError::InvalidResponse(format!(
                "mock script exhausted for {}",
                request.agent
            )))
        })?;
        self.usage.add(&response.usage);
        Ok(response)
    }

    fn llm_string(&self) -> String {
        "mock/scripted".to_string()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    #[tokio::test]
    async fn test_per_agent_queue_wins() {
        let mock = MockLlmClient::new();
        mock.push_text("shared");
        mock.push_text_for(AgentKind::Planner, "planner only");

        let planner = ChatRequest::new(AgentKind::Planner, vec![Message::user("g")]);
        let actor = ChatRequest::new(AgentKind::Actor, vec![Message::user("s")]);
        assert_eq!(mock.complete(&actor).await.unwrap().content, "shared");
        assert_eq!(mock.complete(&planner).await.unwrap().content, "planner only");
        assert!(mock.complete(&planner).await.is_err());
        assert_eq!(mock.requests_for(AgentKind::Planner).len(), 2);
    }
}
