//! Alumni：测试代码直接使用的门面
//!
//! 每个动词都从驱动抓取新快照：`do` 先规划，再逐步让 Actor 产出工具调用并交给执行器；
//! `check` / `get` 走 Retriever；`area` 返回限定在子树上的句柄；`find` 返回驱动原生元素。
//! 可恢复的失败（过期快照、结构化输出不合法等）整个动词重试，次数与间隔来自配置。

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::accessibility::{RawTree, ServerTree};
use crate::agents::{Data, PageContext, RetrievedValue};
use crate::area::{Area, AreaRoot};
use crate::cache::CacheError;
use crate::config::AlumniumConfig;
use crate::core::{AlumniumError, RecoveryEngine};
use crate::drivers::{Driver, DriverError, Element};
use crate::llm::Model;
use crate::session::{Session, SessionStats};
use crate::tools::{ToolCall, ToolExecutor};

/// `do` 中执行过的一个步骤
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoStep {
    pub step: String,
    /// 已映射为 raw id 的工具调用
    pub tools: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DoResult {
    pub steps: Vec<DoStep>,
    /// 开启 changes_analysis 时的变化摘要
    pub changes: Option<String>,
}

pub struct Alumni {
    driver: Arc<dyn Driver>,
    session: Session,
    executor: ToolExecutor,
    recovery: RecoveryEngine,
    config: AlumniumConfig,
}

impl Alumni {
    /// 模型、LLM 与缓存均来自配置；工具集取驱动支持的全部工具
    pub fn new(driver: Arc<dyn Driver>, config: AlumniumConfig) -> Result<Self, AlumniumError> {
        let model = Model::from_config(config.model.as_deref())?;
        let session = Session::from_config(
            model,
            driver.platform(),
            driver.supported_tools(),
            &config,
        )?;
        Ok(Self::with_session(driver, session, config))
    }

    pub fn with_session(driver: Arc<dyn Driver>, session: Session, config: AlumniumConfig) -> Self {
        let executor = ToolExecutor::for_driver(driver.as_ref(), config.tool_timeout());
        tracing::info!(
            "Using model: {}/{}",
            session.model.provider.as_str(),
            session.model.name
        );
        Self {
            driver,
            session,
            executor,
            recovery: RecoveryEngine::new(),
            config,
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &AlumniumConfig {
        &self.config
    }

    /// 规划并执行达成目标所需的步骤
    pub async fn do_(&self, goal: &str) -> Result<DoResult, AlumniumError> {
        self.retrying("do", move || self.do_in(goal, None)).await
    }

    /// 判定陈述为真时返回解释，否则返回 AssertionFailed（携带解释）
    pub async fn check(&self, statement: &str, vision: bool) -> Result<String, AlumniumError> {
        self.retrying("check", move || self.check_in(statement, vision, None))
            .await
    }

    /// 页面上不存在的信息返回 None
    pub async fn get(&self, data: &str, vision: bool) -> Result<Option<Data>, AlumniumError> {
        self.retrying("get", move || self.get_in(data, vision, None))
            .await
    }

    pub async fn area(&self, description: &str) -> Result<Area<'_>, AlumniumError> {
        let (root, explanation) = self
            .retrying("area", move || self.locate_area(description))
            .await?;
        Ok(Area::new(self, root, explanation))
    }

    /// 最佳匹配元素的驱动原生句柄
    pub async fn find(&self, description: &str) -> Result<Element, AlumniumError> {
        self.retrying("find", move || self.find_in(description, None))
            .await
    }

    /// 为 Planner 增加一个 few-shot 示例
    pub fn learn(&self, goal: &str, actions: &[String]) {
        self.session.add_example(goal, actions);
    }

    pub fn clear_learn_examples(&self) {
        self.session.clear_examples();
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    pub fn cache_save(&self) -> Result<(), CacheError> {
        self.session.save_cache()
    }

    pub fn cache_discard(&self) {
        self.session.discard_cache();
    }

    pub fn cache_clear(&self) -> Result<(), CacheError> {
        self.session.clear_cache()
    }

    pub async fn quit(&self) -> Result<(), AlumniumError> {
        tracing::info!(session_id = %self.session.id, "Quitting");
        self.driver.quit().await?;
        Ok(())
    }

    pub(crate) async fn retrying<T, F, Fut>(&self, verb: &str, mut attempt: F) -> Result<T, AlumniumError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AlumniumError>>,
    {
        let attempts = self.config.attempts();
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if tries < attempts && self.recovery.is_retryable(&e) => {
                    tracing::warn!(verb, attempt = tries, error = %e, "Verb failed, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 抓取新快照并替换会话的当前树
    async fn snapshot(&self) -> Result<(RawTree, ServerTree), AlumniumError> {
        let raw = self.driver.accessibility_tree().await?;
        let tree = self.session.ingest(&raw)?;
        Ok((raw, tree))
    }

    /// 限定在区域内的视图；与整棵树共享 id 映射
    async fn view(&self, scope: Option<&AreaRoot>) -> Result<ServerTree, AlumniumError> {
        let (raw, tree) = self.snapshot().await?;
        match scope {
            None => Ok(tree),
            Some(root) => {
                let semantic = root
                    .locate(&raw)
                    .and_then(|raw_id| tree.semantic_id_of_raw(raw_id))
                    .ok_or_else(|| {
                        DriverError::ElementNotFound(format!("area root raw_id={}", root.raw_id))
                    })?;
                Ok(tree.get_area(semantic)?)
            }
        }
    }

    pub(crate) async fn do_in(
        &self,
        goal: &str,
        scope: Option<&AreaRoot>,
    ) -> Result<DoResult, AlumniumError> {
        let initial = self.view(scope).await?;
        let steps = self.session.plan_on(goal, &initial).await?;
        let before_xml = initial.to_xml(&[]);

        let mut result = DoResult::default();
        let mut view = initial;
        for (index, step) in steps.into_iter().enumerate() {
            // 第一步沿用规划时的树
            if index > 0 {
                view = self.view(scope).await?;
            }
            let calls = self.session.execute_on(goal, &step, &view).await?;
            self.executor
                .execute_all(self.driver.as_ref(), &calls)
                .await?;
            result.steps.push(DoStep { step, tools: calls });
        }

        if self.config.changes_analysis && !result.steps.is_empty() {
            let after = self.view(scope).await?;
            let summary = self
                .session
                .analyze_changes_xml(&before_xml, &after.to_xml(&[]))
                .await?;
            result.changes = Some(summary);
        }
        Ok(result)
    }

    async fn retrieve_in(
        &self,
        information: &str,
        vision: bool,
        scope: Option<&AreaRoot>,
    ) -> Result<(String, RetrievedValue), AlumniumError> {
        let view = self.view(scope).await?;
        let title = self.driver.title().await?;
        let url = self.driver.url().await?;
        let screenshot = if vision {
            Some(self.driver.screenshot().await?)
        } else {
            None
        };
        let page = PageContext {
            title: &title,
            url: &url,
            screenshot: screenshot.as_deref(),
        };
        self.session.retrieve_on(information, &view, page).await
    }

    pub(crate) async fn check_in(
        &self,
        statement: &str,
        vision: bool,
        scope: Option<&AreaRoot>,
    ) -> Result<String, AlumniumError> {
        let (explanation, value) = self
            .retrieve_in(
                &format!("Is the following true or false - {statement}"),
                vision,
                scope,
            )
            .await?;
        match Data::from_retrieved(&value) {
            Some(data) if data.is_truthy() => Ok(explanation),
            _ => Err(AlumniumError::AssertionFailed(explanation)),
        }
    }

    pub(crate) async fn get_in(
        &self,
        data: &str,
        vision: bool,
        scope: Option<&AreaRoot>,
    ) -> Result<Option<Data>, AlumniumError> {
        let (_, value) = self.retrieve_in(data, vision, scope).await?;
        Ok(Data::from_retrieved(&value))
    }

    pub(crate) async fn find_in(
        &self,
        description: &str,
        scope: Option<&AreaRoot>,
    ) -> Result<Element, AlumniumError> {
        let view = self.view(scope).await?;
        let located = self.session.find_element_on(description, &view).await?;
        let best = located.first().ok_or_else(|| {
            AlumniumError::StructuredOutput(format!("No element found for '{description}'"))
        })?;
        Ok(self.driver.find_element(best.id).await?)
    }

    async fn locate_area(&self, description: &str) -> Result<(AreaRoot, String), AlumniumError> {
        let (raw, tree) = self.snapshot().await?;
        let area = self.session.find_area_on(description, &tree).await?;
        let raw_id = tree.raw_id_of(area.id)?;
        let root = AreaRoot::new(raw_id, raw.element_by_id(raw_id)?);
        Ok((root, area.explanation))
    }
}
