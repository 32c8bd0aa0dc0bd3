//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AlumniumError 决定整个动词是否值得重试（RetryVerb）还是直接抛给调用方（Surface）。

use thiserror::Error;

use crate::accessibility::AccessibilityError;
use crate::cache::CacheError;
use crate::drivers::DriverError;
use crate::llm::LlmError;

/// 库对外暴露的统一错误
#[derive(Error, Debug)]
pub enum AlumniumError {
    #[error(transparent)]
    Accessibility(#[from] AccessibilityError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// 结构化输出缺失或不符合 schema
    #[error("Structured output error: {0}")]
    StructuredOutput(String),

    #[error("Unsupported tool: {0}")]
    UnsupportedTool(String),

    #[error("Invalid tool call: {0}")]
    InvalidToolCall(String),

    /// check 的判定为 false，携带检索代理的解释
    #[error("{0}")]
    AssertionFailed(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown cache backend: {0}")]
    UnknownCacheBackend(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl From<config::ConfigError> for AlumniumError {
    fn from(e: config::ConfigError) -> Self {
        AlumniumError::Config(e.to_string())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待后重新执行整个动词（重新抓取快照）
    RetryVerb,
    /// 不可恢复，交给调用方
    Surface,
}
