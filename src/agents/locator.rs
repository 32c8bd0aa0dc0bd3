//! Locator：根据描述定位元素，最佳匹配在前

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agents::base::structured;
use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, LlmClient, Message, OutputSchema, Provider, Usage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocatedElement {
    /// Identifier of the element in the accessibility tree.
    pub id: u32,
    /// Explanation why the element matches the description.
    #[serde(default)]
    pub explanation: String,
}

/// Elements matching the description, the best match first.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LocatedElements {
    /// Matching elements.
    pub elements: Vec<LocatedElement>,
}

pub struct LocatorAgent {
    core: AgentCore,
}

impl LocatorAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            core: AgentCore::new(AgentKind::Locator, llm, provider),
        }
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    pub async fn invoke(
        &self,
        description: &str,
        accessibility_tree_xml: &str,
    ) -> Result<Vec<LocatedElement>, AlumniumError> {
        tracing::info!("Starting element location:");
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
        let request = ChatRequest::new(AgentKind::Locator, messages).with_output_schema(
            OutputSchema::of::<LocatedElements>(
                "LocatedElements",
                "Elements matching the description, the best match first.",
            ),
        );
        let response = self.core.invoke(request).await?;
        let located: LocatedElements = structured(AgentKind::Locator, &response)?;
        tracing::info!("  <- Result: {:?}", located.elements);
        Ok(located.elements)
    }
}
