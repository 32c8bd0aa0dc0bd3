//! Actor：为单个步骤产生工具调用（语义 id）

use std::sync::Arc;

use serde_json::Value;

use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, LlmClient, Message, Provider, Usage};
use crate::tools::ToolCall;

pub struct ActorAgent {
    core: AgentCore,
    /// 当前驱动支持的工具 schema
    tools: Vec<Value>,
}

impl ActorAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider, tools: Vec<Value>) -> Self {
        Self {
            core: AgentCore::new(AgentKind::Actor, llm, provider),
            tools,
        }
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    /// 步骤已满足时返回空列表
    pub async fn invoke(
        &self,
        goal: &str,
        step: &str,
        accessibility_tree_xml: &str,
    ) -> Result<Vec<ToolCall>, AlumniumError> {
        tracing::info!("Starting action:");
        tracing::info!("  -> Goal: {}", goal);
        tracing::info!("  -> Step: {}", step);
        tracing::debug!("  -> Accessibility tree: {}", accessibility_tree_xml);

        let prompts = self.core.prompts();
        let messages = vec![
            Message::system(prompts.get("system")),
            Message::user(prompts.render(
                "user",
                &[
                    ("goal", goal),
                    ("step", step),
                    ("accessibility_tree", accessibility_tree_xml),
                ],
            )),
        ];
        let request =
            ChatRequest::new(AgentKind::Actor, messages).with_tools(self.tools.clone());
        let response = self.core.invoke(request).await?;

        if !response.content.trim().is_empty() {
            tracing::info!("  <- Explanation: {}", response.content.trim());
        }
        tracing::info!("  <- Tools: {:?}", response.tool_calls);

        Ok(response.tool_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::{ToolKind, ToolRegistry};
    use serde_json::json;

    #[tokio::test]
    async fn test_actor_returns_tool_calls_in_order() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_tool_calls_for(
            AgentKind::Actor,
            vec![
                ToolCall::new("TypeTool", json!({"id": 9, "text": "Buy milk"})),
                ToolCall::new("PressKeyTool", json!({"key": "Enter"})),
            ],
        );
        let registry = ToolRegistry::for_kinds(&[ToolKind::Type, ToolKind::PressKey]);
        let actor = ActorAgent::new(mock.clone(), Provider::Openai, registry.schemas());

        let calls = actor
            .invoke(
                "create a new task 'Buy milk'",
                "type 'Buy milk' into 'New Todo Input'",
                "<textbox id=\"9\" name=\"New Todo Input\" />",
            )
            .await
            .unwrap();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "TypeTool");
        assert_eq!(calls[1].args["key"], "Enter");

        let request = &mock.requests()[0];
        assert_eq!(request.tools.len(), 2);
        let user = request.last_user_message().unwrap();
        assert!(user.starts_with("Goal: create a new task 'Buy milk'\nStep: type"));
        assert!(user.contains("```xml\n<textbox id=\"9\""));
    }

    #[tokio::test]
    async fn test_satisfied_step_yields_no_calls() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text("The checkbox is already checked.");
        let actor = ActorAgent::new(mock, Provider::Anthropic, Vec::new());
        let calls = actor.invoke("g", "check 'Remember me'", "<checkbox id=\"1\" checked=\"true\" />").await.unwrap();
        assert!(calls.is_empty());
    }
}
