//! 会话管理
//!
//! 每个客户端一个 Session，按 session_id 索引；会话之间不共享 few-shot 示例与当前树，
//! 缓存目录则是进程内共享的。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Session, SessionId, SessionStats};
use crate::accessibility::Platform;
use crate::config::AlumniumConfig;
use crate::core::AlumniumError;
use crate::llm::{Model, Provider};
use crate::tools::ToolKind;

pub struct SessionManager {
    /// 所有会话（session_id -> Session）
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    config: AlumniumConfig,
}

impl SessionManager {
    pub fn new(config: AlumniumConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &AlumniumConfig {
        &self.config
    }

    /// 按 provider / 模型名创建会话，LLM 与缓存来自配置
    pub async fn start_session(
        &self,
        provider: Provider,
        model_name: Option<&str>,
        tools: Vec<ToolKind>,
        platform: Platform,
    ) -> Result<SessionId, AlumniumError> {
        let model = Model::new(provider, model_name);
        let session = Session::from_config(model, platform, tools, &self.config)?;
        Ok(self.insert(session).await)
    }

    /// 注册外部构建的会话（自定义 LLM / 缓存）
    pub async fn insert(&self, session: Session) -> SessionId {
        let session_id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(session));
        session_id
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<Session>, AlumniumError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| AlumniumError::SessionNotFound(session_id.to_string()))
    }

    /// 移除会话；未保存的缓存更新随之丢弃
    pub async fn end_session(&self, session_id: &str) -> Result<(), AlumniumError> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| AlumniumError::SessionNotFound(session_id.to_string()))?;
        session.discard_cache();
        tracing::info!(
            session_id = %session_id,
            age_secs = session.age().as_secs(),
            "Session ended"
        );
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 获取活跃会话数
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 所有会话的用量之和
    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats::default();
        for session in sessions.values() {
            stats.add(&session.stats());
        }
        stats
    }
}
