//! Planner：把目标拆成当前页面上可执行的步骤
//!
//! 回复以 `%SEP%` 分隔；单独的 `NOOP` 表示无事可做。`learn` 注册的示例作为 few-shot 对话插在
//! system 与真实请求之间（会话内有效）。

use std::sync::{Arc, Mutex};

use crate::agents::{AgentCore, AgentKind};
use crate::core::AlumniumError;
use crate::llm::{ChatRequest, LlmClient, Message, Provider, Usage};

pub const LIST_SEPARATOR: &str = "%SEP%";
const NOOP: &str = "NOOP";

/// few-shot 示例：目标与动作列表
#[derive(Debug, Clone, PartialEq)]
pub struct PlanExample {
    pub goal: String,
    pub actions: Vec<String>,
}

pub struct PlannerAgent {
    core: AgentCore,
    examples: Mutex<Vec<PlanExample>>,
}

impl PlannerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, provider: Provider) -> Self {
        Self {
            core: AgentCore::new(AgentKind::Planner, llm, provider),
            examples: Mutex::new(Vec::new()),
        }
    }

    pub fn add_example(&self, goal: &str, actions: &[String]) {
        if let Ok(mut examples) = self.examples.lock() {
            examples.push(PlanExample {
                goal: goal.to_string(),
                actions: actions.to_vec(),
            });
        }
    }

    pub fn clear_examples(&self) {
        if let Ok(mut examples) = self.examples.lock() {
            examples.clear();
        }
    }

    pub fn examples(&self) -> Vec<PlanExample> {
        self.examples.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn usage(&self) -> Usage {
        self.core.usage()
    }

    fn messages(&self, goal: &str, accessibility_tree_xml: &str) -> Vec<Message> {
        let prompts = self.core.prompts();
        let mut messages = vec![Message::system(
            prompts.render("system", &[("separator", LIST_SEPARATOR)]),
        )];
        for example in self.examples() {
            messages.push(Message::user(prompts.render(
                "user",
                &[("goal", &example.goal), ("accessibility_tree", "")],
            )));
            messages.push(Message::assistant(example.actions.join(LIST_SEPARATOR)));
        }
        messages.push(Message::user(prompts.render(
            "user",
            &[("goal", goal), ("accessibility_tree", accessibility_tree_xml)],
        )));
        messages
    }

    pub async fn invoke(
        &self,
        goal: &str,
        accessibility_tree_xml: &str,
    ) -> Result<Vec<String>, AlumniumError> {
        tracing::info!("Starting planning:");
        tracing::info!("  -> Goal: {}", goal);
        tracing::debug!("  -> Accessibility tree: {}", accessibility_tree_xml);

        let request = ChatRequest::new(
            AgentKind::Planner,
            self.messages(goal, accessibility_tree_xml),
        );
        let response = self.core.invoke(request).await?;
        tracing::info!("  <- Result: {}", response.content);

        Ok(parse_steps(&response.content))
    }
}

/// 按分隔符切分，去掉空项与 NOOP
pub fn parse_steps(content: &str) -> Vec<String> {
    let trimmed = content.trim();
    let trimmed = trimmed.strip_prefix(LIST_SEPARATOR).unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(LIST_SEPARATOR).unwrap_or(trimmed);
    trimmed
        .split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|step| !step.is_empty() && !step.eq_ignore_ascii_case(NOOP))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_steps() {
        assert_eq!(
            parse_steps("%SEP% type 'Buy milk' into 'New Todo Input'%SEP%press Enter %SEP%"),
            vec!["type 'Buy milk' into 'New Todo Input'", "press Enter"]
        );
    }

    #[test]
    fn test_parse_noop() {
        assert!(parse_steps("NOOP").is_empty());
        assert!(parse_steps("  noop \n").is_empty());
        assert!(parse_steps("").is_empty());
    }

    #[tokio::test]
    async fn test_noop_goal_returns_empty_plan() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text("NOOP");
        let planner = PlannerAgent::new(mock, Provider::Openai);
        let steps = planner.invoke("do nothing", "<RootWebArea id=\"1\" />").await.unwrap();
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn test_examples_precede_request() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text("click button 'Login'");
        let planner = PlannerAgent::new(mock.clone(), Provider::Openai);
        planner.add_example("log in", &["click button 'Login'".to_string()]);

        planner.invoke("log out", "<button id=\"2\" />").await.unwrap();

        let request = &mock.requests()[0];
        assert_eq!(request.messages.len(), 4);
        assert!(request.messages[1].content.ends_with("goal: log in"));
        assert_eq!(request.messages[2].content, "click button 'Login'");
        assert!(request.last_user_message().unwrap().ends_with("goal: log out"));

        planner.clear_examples();
        assert!(planner.examples().is_empty());
    }
}
