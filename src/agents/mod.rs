//! 代理层：Planner / Actor / Retriever / Area / Locator / ChangesAnalyzer
//!
//! 每个代理 = 提示词模板 + LLM 调用 + 输出解析 + 用量统计（AgentCore）。代理只处理语义 id 的 XML，
//! 不接触驱动与 raw id。

pub mod actor;
pub mod area;
pub mod base;
pub mod changes;
pub mod locator;
pub mod planner;
pub mod prompts;
pub mod retriever;
pub mod typecast;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use actor::ActorAgent;
pub use area::{AreaAgent, AreaResponse};
pub use base::AgentCore;
pub use changes::ChangesAnalyzerAgent;
pub use locator::{LocatedElement, LocatorAgent};
pub use planner::{PlanExample, PlannerAgent};
pub use prompts::Prompts;
pub use retriever::{PageContext, RetrievedValue, RetrieverAgent};
pub use typecast::{loose_typecast, Data};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Planner,
    Actor,
    Retriever,
    Area,
    Locator,
    ChangesAnalyzer,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Planner,
        AgentKind::Actor,
        AgentKind::Retriever,
        AgentKind::Area,
        AgentKind::Locator,
        AgentKind::ChangesAnalyzer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planner => "planner",
            AgentKind::Actor => "actor",
            AgentKind::Retriever => "retriever",
            AgentKind::Area => "area",
            AgentKind::Locator => "locator",
            AgentKind::ChangesAnalyzer => "changes_analyzer",
        }
    }

    /// 缓存目录名
    pub fn cache_dir(&self) -> &'static str {
        match self {
            AgentKind::Planner => "plans",
            AgentKind::Actor => "actions",
            AgentKind::Retriever => "retrievals",
            AgentKind::Area => "areas",
            AgentKind::Locator => "locators",
            AgentKind::ChangesAnalyzer => "changes",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
