//! ChangesAnalyzer：把无障碍树 unified diff 总结成一段话

use std::sync::Arc;

use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, LlmClient, Message, Provider, Usage};

pub struct ChangesAnalyzerAgent {
    core: AgentCore,
}

impl ChangesAnalyzerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            core: AgentCore::new(AgentKind::ChangesAnalyzer, llm, provider),
        }
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    pub async fn invoke(&self, diff: &str) -> Result<String, AlumniumError> {
        tracing::info!("Starting changes analysis:");
        let indented: Vec<String> = diff.lines().map(|line| format!("  {line}")).collect();
        tracing::debug!("  -> Diff:\n{}", indented.join("\n"));

        let prompts = self.core.prompts();
        let messages = vec![
            Message::system(prompts.get("system")),
            Message::user(prompts.render("user", &[("diff", diff)])),
        ];
        let response = self
            .core
            .invoke(ChatRequest::new(AgentKind::ChangesAnalyzer, messages))
            .await?;

        let summary = response.content.trim().replace("\n\n", " ");
        tracing::info!("  <- Result: {}", summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[tokio::test]
    async fn test_summary_joins_paragraphs() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text("A dialog opened.\n\nThe cart shows 1 item.\n");
        let agent = ChangesAnalyzerAgent::new(mock.clone(), Provider::Openai);
        let summary = agent.invoke("-a\n+b").await.unwrap();
        assert_eq!(summary, "A dialog opened. The cart shows 1 item.");
        assert!(mock.requests()[0]
            .last_user_message()
            .unwrap()
            .contains("```diff\n-a\n+b\n```"));
    }
}
