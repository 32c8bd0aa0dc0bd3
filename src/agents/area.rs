//! Area：根据描述找到代表某个区域的元素（语义 id）

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accessibility::server::parse_id;
use crate::agents::base::structured;
use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, Message, OutputSchema, Provider, Usage};

const DEFAULT_EXPLANATION: &str = "No explanation provided by the model.";

/// Area of the accessibility tree to use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AreaResponse {
    /// Explanation how the area was determined and why it's related to the requested information. Always include the requested information and its value in the explanation.
    pub explanation: String,
    /// Identifier of the element that corresponds to the area in the accessibility tree.
    pub id: u32,
}

pub struct AreaAgent {
    core: AgentCore,
}

impl AreaAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            core: AgentCore::new(AgentKind::Area, llm, provider),
        }
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    pub async fn invoke(
        &self,
        description: &str,
        accessibility_tree_xml: &str,
    ) -> Result<AreaResponse, AlumniumError> {
        tracing::info!("Starting area detection:");
        tracing::info!("  -> Description: {}", description);
        tracing::debug!("  -> Accessibility tree: {}", accessibility_tree_xml);

        let prompts = self.core.prompts();
        let messages = vec![
            Message::system(prompts.get("system")),
            Message::user(prompts.render(
                "user",
                &[
                    ("accessibility_tree", accessibility_tree_xml),
                    ("description", description),
                ],
            )),
        ];
        let request = ChatRequest::new(AgentKind::Area, messages).with_output_schema(
            OutputSchema::of::<AreaResponse>("Area", "Area of the accessibility tree to use."),
        );
        let response = self.core.invoke(request).await?;
        let area = parse_area(&response)?;
        tracing::info!("  <- Result: {:?}", area);
        Ok(area)
    }
}

/// 部分模型不返回结构化输出而是普通工具调用：接受其参数（可能包在 properties 里）
fn parse_area(response: &ChatResponse) -> Result<AreaResponse, AlumniumError> {
    if response.parsed.is_none() {
        if let Some(call) = response.tool_calls.first() {
            return area_from_args(&call.args);
        }
    }
    structured::<Value>(AgentKind::Area, response).and_then(|value| area_from_args(&value))
}

fn area_from_args(args: &Value) -> Result<AreaResponse, AlumniumError> {
    let args = args.get("properties").unwrap_or(args);
    let id = args
        .get("id")
        .ok_or_else(|| AlumniumError::StructuredOutput("area: missing `id`".to_string()))
        .and_then(|v| {
            parse_id(v).map_err(|e| AlumniumError::StructuredOutput(format!("area: {e}")))
        })?;
    let explanation = args
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_EXPLANATION)
        .to_string();
    Ok(AreaResponse { explanation, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::ToolCall;
    use serde_json::json;

    #[tokio::test]
    async fn test_area_structured() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_structured_for(
            AgentKind::Area,
            json!({"id": 12, "explanation": "Table with caption 'Example 1'"}),
        );
        let agent = AreaAgent::new(mock, Provider::Openai);
        let area = agent.invoke("example 1 table", "<table id=\"12\" />").await.unwrap();
        assert_eq!(area.id, 12);
    }

    #[test]
    fn test_area_from_tool_call_with_properties() {
        let response = ChatResponse::with_tool_calls(vec![ToolCall::new(
            "Area",
            json!({"properties": {"id": "7"}}),
        )]);
        let area = parse_area(&response).unwrap();
        assert_eq!(area.id, 7);
        assert_eq!(area.explanation, DEFAULT_EXPLANATION);
    }

    #[test]
    fn test_area_missing_id() {
        let response = ChatResponse::structured(json!({"explanation": "none"}));
        assert!(matches!(
            parse_area(&response),
            Err(AlumniumError::StructuredOutput(_))
        ));
    }
}
