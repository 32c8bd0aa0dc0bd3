//! 会话：一组代理 + 缓存链 + 当前无障碍树
//!
//! 对外动词接收字符串快照（Chromium 为 JSON，移动端为 XML），按声明的平台规范化后交给代理；
//! `*_on` 变体直接接收已构建的 ServerTree，供 Alumni 门面与区域句柄复用。
//! 返回给调用方的工具调用与元素 id 一律是 raw id。

pub mod manager;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use crate::accessibility::{unified_diff, AccessibilityError, Platform, RawTree, ServerTree};
use crate::agents::{
    ActorAgent, AreaAgent, AreaResponse, ChangesAnalyzerAgent, LocatedElement, LocatorAgent,
    PageContext, PlanExample, PlannerAgent, RetrievedValue, RetrieverAgent,
};
use crate::cache::{create_cache, Cache, CacheError};
use crate::config::AlumniumConfig;
use crate::core::AlumniumError;
use crate::llm::{create_llm, CachedLlmClient, LlmClient, Model, Usage};
use crate::tools::{ToolCall, ToolKind, ToolRegistry};

pub use manager::SessionManager;

/// 会话 ID
pub type SessionId = String;

/// 两棵树 XML 相同时的结论，不调用 LLM
pub const NO_CHANGES: &str = "No changes detected.";

/// 用量统计：代理合计（含缓存命中）与缓存节省
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: Usage,
    pub cache: Usage,
}

impl SessionStats {
    pub fn add(&mut self, other: &SessionStats) {
        self.total.add(&other.total);
        self.cache.add(&other.cache);
    }
}

pub struct Session {
    pub id: SessionId,
    pub model: Model,
    pub platform: Platform,
    tools: Vec<ToolKind>,
    cache: Arc<dyn Cache>,
    planner: PlannerAgent,
    actor: ActorAgent,
    retriever: RetrieverAgent,
    area: AreaAgent,
    locator: LocatorAgent,
    changes_analyzer: ChangesAnalyzerAgent,
    /// 最近一次请求带来的树；只会被整体替换
    tree: Mutex<Option<ServerTree>>,
    created_at: Instant,
}

impl Session {
    /// `llm` 为下游客户端（已带限流重试），这里再套一层缓存
    pub fn new(
        model: Model,
        platform: Platform,
        tools: Vec<ToolKind>,
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(CachedLlmClient::new(llm, Arc::clone(&cache)));
        let provider = model.provider;
        let schemas = ToolRegistry::for_kinds(&tools).schemas();

        let session = Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            planner: PlannerAgent::new(Arc::clone(&llm), provider),
            actor: ActorAgent::new(Arc::clone(&llm), provider, schemas),
            retriever: RetrieverAgent::new(Arc::clone(&llm), provider),
            area: AreaAgent::new(Arc::clone(&llm), provider),
            locator: LocatorAgent::new(Arc::clone(&llm), provider),
            changes_analyzer: ChangesAnalyzerAgent::new(llm, provider),
            model,
            platform,
            tools,
            cache,
            tree: Mutex::new(None),
            created_at: Instant::now(),
        };
        tracing::info!(
            session_id = %session.id,
            provider = %session.model.provider.as_str(),
            model = %session.model.name,
            platform = %session.platform,
            cache = session.cache.name(),
            "Session started"
        );
        session
    }

    /// 按配置创建 LLM 与缓存
    pub fn from_config(
        model: Model,
        platform: Platform,
        tools: Vec<ToolKind>,
        config: &AlumniumConfig,
    ) -> Result<Self, AlumniumError> {
        let llm = create_llm(&model)?;
        let cache = create_cache(config, &model)?;
        Ok(Self::new(model, platform, tools, llm, cache))
    }

    pub fn tools(&self) -> &[ToolKind] {
        &self.tools
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// 规范化并替换当前树
    pub fn ingest(&self, raw: &RawTree) -> Result<ServerTree, AlumniumError> {
        let tree = ServerTree::build(raw)?;
        if let Ok(mut current) = self.tree.lock() {
            *current = Some(tree.clone());
        }
        Ok(tree)
    }

    pub fn ingest_snapshot(&self, snapshot: &str) -> Result<ServerTree, AlumniumError> {
        let raw = RawTree::parse(self.platform, snapshot)?;
        self.ingest(&raw)
    }

    pub fn current_tree(&self) -> Option<ServerTree> {
        self.tree.lock().ok().and_then(|tree| tree.clone())
    }

    pub async fn plan(&self, goal: &str, snapshot: &str) -> Result<Vec<String>, AlumniumError> {
        let tree = self.ingest_snapshot(snapshot)?;
        self.plan_on(goal, &tree).await
    }

    pub async fn plan_on(&self, goal: &str, tree: &ServerTree) -> Result<Vec<String>, AlumniumError> {
        self.planner.invoke(goal, &tree.to_xml(&[])).await
    }

    /// 返回 raw id 的工具调用
    pub async fn execute(
        &self,
        goal: &str,
        step: &str,
        snapshot: &str,
    ) -> Result<Vec<ToolCall>, AlumniumError> {
        let tree = self.ingest_snapshot(snapshot)?;
        self.execute_on(goal, step, &tree).await
    }

    /// `view` 可以是区域子树；id 经共享映射换算为 raw id
    pub async fn execute_on(
        &self,
        goal: &str,
        step: &str,
        view: &ServerTree,
    ) -> Result<Vec<ToolCall>, AlumniumError> {
        let calls = self.actor.invoke(goal, step, &view.to_xml(&[])).await?;
        for call in &calls {
            if !self.tools.iter().any(|kind| kind.name() == call.name) {
                return Err(AlumniumError::UnsupportedTool(call.name.clone()));
            }
        }
        Ok(view.map_tool_calls_to_raw(&calls)?)
    }

    pub async fn retrieve(
        &self,
        information: &str,
        snapshot: &str,
        page: PageContext<'_>,
    ) -> Result<(String, RetrievedValue), AlumniumError> {
        let tree = self.ingest_snapshot(snapshot)?;
        self.retrieve_on(information, &tree, page).await
    }

    pub async fn retrieve_on(
        &self,
        information: &str,
        view: &ServerTree,
        page: PageContext<'_>,
    ) -> Result<(String, RetrievedValue), AlumniumError> {
        self.retriever.invoke(information, &view.to_xml(&[]), page).await
    }

    /// 返回语义 id；调用方用同一棵树的 `get_area` 缩小范围
    pub async fn find_area(
        &self,
        description: &str,
        snapshot: &str,
    ) -> Result<AreaResponse, AlumniumError> {
        let tree = self.ingest_snapshot(snapshot)?;
        self.find_area_on(description, &tree).await
    }

    pub async fn find_area_on(
        &self,
        description: &str,
        view: &ServerTree,
    ) -> Result<AreaResponse, AlumniumError> {
        let area = self.area.invoke(description, &view.to_xml(&[])).await?;
        if !view.contains(area.id) {
            return Err(AccessibilityError::UnknownSemanticId(area.id.to_string()).into());
        }
        Ok(area)
    }

    /// 最佳匹配在前，id 已换算为 raw id
    pub async fn find_element(
        &self,
        description: &str,
        snapshot: &str,
    ) -> Result<Vec<LocatedElement>, AlumniumError> {
        let tree = self.ingest_snapshot(snapshot)?;
        self.find_element_on(description, &tree).await
    }

    pub async fn find_element_on(
        &self,
        description: &str,
        view: &ServerTree,
    ) -> Result<Vec<LocatedElement>, AlumniumError> {
        let located = self.locator.invoke(description, &view.to_xml(&[])).await?;
        located
            .into_iter()
            .map(|element| -> Result<LocatedElement, AlumniumError> {
                Ok(LocatedElement {
                    id: view.raw_id_of(element.id)?,
                    explanation: element.explanation,
                })
            })
            .collect()
    }

    /// 两次快照的变化摘要；后一次成为当前树
    pub async fn analyze_changes(
        &self,
        before_snapshot: &str,
        after_snapshot: &str,
    ) -> Result<String, AlumniumError> {
        let before = ServerTree::build(&RawTree::parse(self.platform, before_snapshot)?)?;
        let after = self.ingest_snapshot(after_snapshot)?;
        self.analyze_changes_xml(&before.to_xml(&[]), &after.to_xml(&[]))
            .await
    }

    pub async fn analyze_changes_xml(
        &self,
        before_xml: &str,
        after_xml: &str,
    ) -> Result<String, AlumniumError> {
        if before_xml == after_xml {
            tracing::debug!("Accessibility tree unchanged, skipping changes analysis");
            return Ok(NO_CHANGES.to_string());
        }
        let diff = unified_diff(before_xml, after_xml);
        if diff.is_empty() {
            return Ok(NO_CHANGES.to_string());
        }
        self.changes_analyzer.invoke(&diff).await
    }

    pub fn add_example(&self, goal: &str, actions: &[String]) {
        self.planner.add_example(goal, actions);
    }

    pub fn clear_examples(&self) {
        self.planner.clear_examples();
    }

    pub fn examples(&self) -> Vec<PlanExample> {
        self.planner.examples()
    }

    pub fn save_cache(&self) -> Result<(), CacheError> {
        self.cache.save()
    }

    pub fn discard_cache(&self) {
        self.cache.discard();
    }

    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.cache.clear()
    }

    pub fn stats(&self) -> SessionStats {
        let mut total = Usage::default();
        for usage in [
            self.planner.usage(),
            self.actor.usage(),
            self.retriever.usage(),
            self.area.usage(),
            self.locator.usage(),
            self.changes_analyzer.usage(),
        ] {
            total.add(&usage);
        }
        SessionStats {
            total,
            cache: self.cache.usage(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agents::AgentKind;
    use crate::cache::NullCache;
    use crate::llm::{ChatResponse, MockLlmClient, Provider};
    use serde_json::json;

    pub(crate) const TODO_SNAPSHOT: &str = r#"{"nodes": [
        {"nodeId": "1", "backendDOMNodeId": 10, "role": {"value": "RootWebArea"},
         "name": {"value": "TodoMVC"}, "childIds": ["2", "3", "4"]},
        {"nodeId": "2", "parentId": "1", "backendDOMNodeId": 20, "role": {"value": "textbox"},
         "name": {"value": "New Todo Input"}, "childIds": []},
        {"nodeId": "3", "parentId": "1", "backendDOMNodeId": 30, "role": {"value": "list"},
         "childIds": ["5"]},
        {"nodeId": "4", "parentId": "1", "backendDOMNodeId": 40, "role": {"value": "button"},
         "name": {"value": "Clear completed"}, "childIds": []},
        {"nodeId": "5", "parentId": "3", "backendDOMNodeId": 50, "role": {"value": "listitem"},
         "name": {"value": "Buy milk"}, "childIds": []}
    ]}"#;

    fn session(mock: &Arc<MockLlmClient>) -> Session {
        Session::new(
            Model::new(Provider::Openai, None),
            Platform::Chromium,
            ToolKind::ALL.to_vec(),
            Arc::clone(mock) as Arc<dyn LlmClient>,
            Arc::new(NullCache),
        )
    }

    #[tokio::test]
    async fn test_plan_replaces_current_tree() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text_for(AgentKind::Planner, "Type 'Buy milk'%SEP%Press Enter");
        let session = session(&mock);
        assert!(session.current_tree().is_none());

        let steps = session.plan("add a todo", TODO_SNAPSHOT).await.unwrap();
        assert_eq!(steps, vec!["Type 'Buy milk'", "Press Enter"]);
        assert_eq!(session.current_tree().unwrap().len(), 5);

        let prompt = mock.requests_for(AgentKind::Planner)[0]
            .last_user_message()
            .unwrap()
            .to_string();
        assert!(prompt.contains("New Todo Input"));
    }

    #[tokio::test]
    async fn test_execute_returns_raw_ids() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_tool_calls_for(
            AgentKind::Actor,
            vec![
                ToolCall::new("TypeTool", json!({"id": 2, "text": "Buy milk"})),
                ToolCall::new("PressKeyTool", json!({"key": "Enter"})),
            ],
        );
        let session = session(&mock);

        let calls = session
            .execute("add a todo", "type 'Buy milk'", TODO_SNAPSHOT)
            .await
            .unwrap();
        // textbox 是第 2 个先序节点
        assert_eq!(calls[0].args, json!({"id": 2, "text": "Buy milk"}));
        assert_eq!(calls[1].args, json!({"key": "Enter"}));
    }

    #[tokio::test]
    async fn test_execute_rejects_tool_outside_driver_set() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_tool_calls_for(
            AgentKind::Actor,
            vec![ToolCall::new("ExecuteJavascriptTool", json!({"script": "1"}))],
        );
        let session = Session::new(
            Model::new(Provider::Openai, None),
            Platform::Chromium,
            vec![ToolKind::Click, ToolKind::Type],
            Arc::clone(&mock) as Arc<dyn LlmClient>,
            Arc::new(NullCache),
        );
        let err = session.execute("g", "s", TODO_SNAPSHOT).await.unwrap_err();
        assert!(matches!(err, AlumniumError::UnsupportedTool(name) if name == "ExecuteJavascriptTool"));
    }

    #[tokio::test]
    async fn test_find_area_rejects_unknown_id() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_structured_for(AgentKind::Area, json!({"explanation": "list", "id": 3}));
        mock.push_structured_for(AgentKind::Area, json!({"explanation": "nope", "id": 99}));
        let session = session(&mock);

        let area = session.find_area("todo list", TODO_SNAPSHOT).await.unwrap();
        assert_eq!(area.id, 3);
        let err = session.find_area("nothing", TODO_SNAPSHOT).await.unwrap_err();
        assert!(matches!(
            err,
            AlumniumError::Accessibility(AccessibilityError::UnknownSemanticId(_))
        ));
    }

    #[tokio::test]
    async fn test_find_element_maps_to_raw() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_structured_for(
            AgentKind::Locator,
            json!({"elements": [{"id": 4, "explanation": "the todo item"}]}),
        );
        let session = session(&mock);
        let found = session
            .find_element("first todo", TODO_SNAPSHOT)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 4);
        assert_eq!(found[0].explanation, "the todo item");
    }

    #[tokio::test]
    async fn test_analyze_identical_snapshots_skips_llm() {
        let mock = Arc::new(MockLlmClient::new());
        let session = session(&mock);
        let summary = session
            .analyze_changes(TODO_SNAPSHOT, TODO_SNAPSHOT)
            .await
            .unwrap();
        assert_eq!(summary, NO_CHANGES);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_analyze_changes_sends_diff() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text_for(AgentKind::ChangesAnalyzer, "The todo was removed.");
        let session = session(&mock);
        let after = TODO_SNAPSHOT.replace("Buy milk", "Buy bread");
        let summary = session.analyze_changes(TODO_SNAPSHOT, &after).await.unwrap();
        assert_eq!(summary, "The todo was removed.");

        let prompt = mock.requests_for(AgentKind::ChangesAnalyzer)[0]
            .last_user_message()
            .unwrap()
            .to_string();
        assert!(prompt.contains("-"));
        assert!(prompt.contains("Buy bread"));
    }

    #[tokio::test]
    async fn test_stats_sum_agent_usage() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_for(
            AgentKind::Planner,
            ChatResponse::text("NOOP").with_usage(Usage::new(100, 5)),
        );
        let session = session(&mock);
        let steps = session.plan("do nothing", TODO_SNAPSHOT).await.unwrap();
        assert!(steps.is_empty());

        let stats = session.stats();
        assert_eq!(stats.total, Usage::new(100, 5));
        assert_eq!(stats.cache, Usage::default());
    }

    #[test]
    fn test_examples_are_session_scoped() {
        let mock = Arc::new(MockLlmClient::new());
        let first = session(&mock);
        let second = session(&mock);
        first.add_example("log in", &["Click 'Login'".to_string()]);
        assert_eq!(first.examples().len(), 1);
        assert!(second.examples().is_empty());
        first.clear_examples();
        assert!(first.examples().is_empty());
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_malformed_snapshot_surfaces() {
        let mock = Arc::new(MockLlmClient::new());
        let session = session(&mock);
        let err = session.ingest_snapshot("not json").unwrap_err();
        assert!(matches!(
            err,
            AlumniumError::Accessibility(AccessibilityError::MalformedSnapshot(_))
        ));
    }
}
