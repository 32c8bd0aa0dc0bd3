//! 限流重试包装
//!
//! 仅对 `LlmError::is_retryable()` 为真的错误（限流 / 过载）按指数退避重试，其余错误直接返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};

/// 退避参数：默认最多 8 次，首次等待 1 秒，每次翻倍
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败（从 1 开始）后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay * self.factor.saturating_pow(exp)
    }
}

pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>) -> Self {
        Self::with_config(inner, RetryConfig::default())
    }

    pub fn with_config(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut attempt = 1;
        loop {
            match self.inner.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call throttled, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
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
    use crate::llm::{Message, MockLlmClient};

    fn request() -> ChatRequest {
        ChatRequest::new(AgentKind::Planner, vec![Message::user("goal")])
    }

    #[test]
    fn test_delay_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(7), Duration::from_secs(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::RateLimited("429".into()));
        mock.push_error(LlmError::Overloaded("busy".into()));
        mock.push_text("step one");

        let client = RetryingLlmClient::new(mock.clone());
        let response = client.complete(&request()).await.unwrap();
        assert_eq!(response.content, "step one");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..10 {
            mock.push_error(LlmError::RateLimited("429".into()));
        }
        let client = RetryingLlmClient::new(mock.clone());
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited(_)));
        assert_eq!(mock.calls(), 8);
    }

    #[tokio::test]
    async fn test_non_retryable_surfaces_immediately() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Api {
            status: 400,
            message: "bad request".into(),
        });
        let client = RetryingLlmClient::new(mock.clone());
        assert!(client.complete(&request()).await.is_err());
        assert_eq!(mock.calls(), 1);
    }
}
