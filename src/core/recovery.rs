//! 错误恢复引擎
//!
//! 根据 AlumniumError 类型返回 RecoveryAction，供 Alumni 的动词级重试决定是再来一次还是直接抛出。
//! LLM 的限流已在 RetryingLlmClient 内处理，这里不再重试。

use crate::core::{AlumniumError, RecoveryAction};
use crate::drivers::DriverError;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AlumniumError) -> RecoveryAction {
        match err {
            // 过期快照、页面上下文销毁、动作超时
            AlumniumError::Driver(DriverError::ElementNotFound(_))
            | AlumniumError::Driver(DriverError::ContextDestroyed(_))
            | AlumniumError::Driver(DriverError::Timeout(_))
            | AlumniumError::Driver(DriverError::Script(_)) => RecoveryAction::RetryVerb,
            // LLM 语义失败：结构化输出不合法、工具参数不合法
            AlumniumError::StructuredOutput(_) | AlumniumError::InvalidToolCall(_) => {
                RecoveryAction::RetryVerb
            }
            _ => RecoveryAction::Surface,
        }
    }

    pub fn is_retryable(&self, err: &AlumniumError) -> bool {
        self.handle(err) == RecoveryAction::RetryVerb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::AccessibilityError;
    use crate::llm::LlmError;

    #[test]
    fn test_recovery_stale_element() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::Driver(DriverError::ElementNotFound("raw_id=4".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::RetryVerb);
    }

    #[test]
    fn test_recovery_context_destroyed() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::Driver(DriverError::ContextDestroyed("navigation".into()));
        assert!(engine.is_retryable(&err));
    }

    #[test]
    fn test_recovery_structured_output() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::StructuredOutput("missing `value`".into());
        assert_eq!(engine.handle(&err), RecoveryAction::RetryVerb);
    }

    #[test]
    fn test_recovery_input_errors_surface() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::Accessibility(AccessibilityError::UnknownSemanticId("77".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Surface);
        let err = AlumniumError::Accessibility(AccessibilityError::MalformedSnapshot("x".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Surface);
    }

    #[test]
    fn test_recovery_llm_and_assertion_surface() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::Llm(LlmError::RateLimited("429".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Surface);
        let err = AlumniumError::AssertionFailed("not shown".into());
        assert_eq!(engine.handle(&err), RecoveryAction::Surface);
    }

    #[test]
    fn test_recovery_connection_lost_surfaces() {
        let engine = RecoveryEngine::new();
        let err = AlumniumError::Driver(DriverError::Transport("socket closed".into()));
        assert_eq!(engine.handle(&err), RecoveryAction::Surface);
    }
}
