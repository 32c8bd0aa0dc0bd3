//! 带缓存的 LLM 客户端
//!
//! 先查缓存链，命中直接返回（用量仍计入代理，同时记为缓存用量）；未命中时调用下游并写入内存缓存，
//! 由 Session 决定 save / discard。

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};

pub struct CachedLlmClient {
    inner: Arc<dyn LlmClient>,
    cache: Arc<dyn Cache>,
}

impl CachedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }
}

#[async_trait]
impl LlmClient for CachedLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let llm_string = self.inner.llm_string();
        if let Some(hit) = self.cache.lookup(request, &llm_string) {
            tracing::debug!(agent = %request.agent, "LLM cache hit");
            return Ok(hit);
        }
        let response = self.inner.complete(request).await?;
        self.cache.update(request, &llm_string, &response);
        Ok(response)
    }

    fn llm_string(&self) -> String {
        self.inner.llm_string()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentKind;
    use crate::cache::FilesystemCache;
    use crate::llm::{Message, MockLlmClient, Model, Provider, Usage};

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::new(Provider::Openai, None);
        let cache: Arc<dyn Cache> = Arc::new(FilesystemCache::new(dir.path(), &model));
        let mock = Arc::new(MockLlmClient::new());
        mock.push(Ok(ChatResponse::text("Click login").with_usage(Usage::new(10, 2))));

        let client = CachedLlmClient::new(mock.clone(), cache.clone());
        let request = ChatRequest::new(AgentKind::Planner, vec![Message::user("login")]);

        let first = client.complete(&request).await.unwrap();
        let second = client.complete(&request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.calls(), 1);
        assert_eq!(cache.usage(), Usage::new(10, 2));
    }
}
