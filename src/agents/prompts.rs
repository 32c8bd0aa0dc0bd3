//! 提示词模板
//!
//! 模板在编译期嵌入（templates/<agent>/<set>/<name>.md）。provider 专用集合缺少某个模板时回退到 openai。
//! 占位符形如 `{goal}`，单遍替换，替换值中的花括号不会被再次展开。

use crate::agents::AgentKind;
use crate::llm::Provider;

const FALLBACK_SET: &str = "openai";

fn template(agent: AgentKind, set: &str, name: &str) -> Option<&'static str> {
    let text = match (agent, set, name) {
        (AgentKind::Planner, "openai", "system") => {
            include_str!("templates/planner/openai/system.md")
        }
        (AgentKind::Planner, "openai", "user") => include_str!("templates/planner/openai/user.md"),
        (AgentKind::Planner, "anthropic", "system") => {
            include_str!("templates/planner/anthropic/system.md")
        }
        (AgentKind::Actor, "openai", "system") => include_str!("templates/actor/openai/system.md"),
        (AgentKind::Actor, "openai", "user") => include_str!("templates/actor/openai/user.md"),
        (AgentKind::Actor, "anthropic", "system") => {
            include_str!("templates/actor/anthropic/system.md")
        }
        (AgentKind::Retriever, "openai", "system") => {
            include_str!("templates/retriever/openai/system.md")
        }
        (AgentKind::Retriever, "openai", "_user_text") => {
            include_str!("templates/retriever/openai/_user_text.md")
        }
        (AgentKind::Area, "openai", "system") => include_str!("templates/area/openai/system.md"),
        (AgentKind::Area, "openai", "user") => include_str!("templates/area/openai/user.md"),
        (AgentKind::Locator, "openai", "system") => {
            include_str!("templates/locator/openai/system.md")
        }
        (AgentKind::Locator, "openai", "user") => include_str!("templates/locator/openai/user.md"),
        (AgentKind::ChangesAnalyzer, "openai", "system") => {
            include_str!("templates/changes/openai/system.md")
        }
        (AgentKind::ChangesAnalyzer, "openai", "user") => {
            include_str!("templates/changes/openai/user.md")
        }
        _ => return None,
    };
    Some(text.trim_end())
}

/// 某个代理在某个 provider 下的模板集合
#[derive(Debug, Clone, Copy)]
pub struct Prompts {
    agent: AgentKind,
    set: &'static str,
}

impl Prompts {
    pub fn new(agent: AgentKind, provider: Provider) -> Self {
        Self {
            agent,
            set: provider.prompt_set(),
        }
    }

    pub fn get(&self, name: &str) -> &'static str {
        template(self.agent, self.set, name)
            .or_else(|| template(self.agent, FALLBACK_SET, name))
            .unwrap_or_default()
    }

    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> String {
        render(self.get(name), vars)
    }
}

/// 单遍替换 `{key}`；未知占位符原样保留
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after.find('}').and_then(|end| {
            let key = &after[..end];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (end, *value))
        });
        match replaced {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_single_pass() {
        let text = render(
            "Goal: {goal}\nTree: {accessibility_tree}",
            &[("goal", "say {accessibility_tree}"), ("accessibility_tree", "<a />")],
        );
        assert_eq!(text, "Goal: say {accessibility_tree}\nTree: <a />");
    }

    #[test]
    fn test_render_keeps_unknown() {
        assert_eq!(render("{x} and {", &[]), "{x} and {");
    }

    #[test]
    fn test_anthropic_override_and_fallback() {
        let prompts = Prompts::new(AgentKind::Planner, Provider::Anthropic);
        assert!(prompts.get("system").starts_with("You plan"));
        assert!(prompts.get("user").contains("achieve the following goal:"));
    }

    #[test]
    fn test_every_agent_has_system_prompt() {
        for agent in AgentKind::ALL {
            let prompts = Prompts::new(agent, Provider::Openai);
            assert!(!prompts.get("system").is_empty(), "{agent}");
        }
    }
}
