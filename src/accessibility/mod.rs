//! 无障碍树：平台快照 → 规范化原始树（raw_id） → 面向 LLM 的服务端树（语义 id）
//!
//! - xml：元素模型、解析与缩进序列化
//! - raw：Chromium CDP 节点 / Appium XML 规范化，raw_id 分配与元素描述符解析
//! - element：驱动定位元素所需的描述符
//! - server：剪枝、文本内联、语义 id 分配与回映射
//! - diff：前后两棵树的 unified diff 与状态变化摘要

pub mod diff;
pub mod element;
pub mod raw;
pub mod server;
pub mod xml;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use diff::{unified_diff, StateDiff};
pub use element::{ElementDescriptor, LocatorHint};
pub use raw::RawTree;
pub use server::{AreaScope, ServerTree};
pub use xml::XmlElement;

/// 快照来源平台，决定规范化与元素解析方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Chromium,
    Xcuitest,
    Uiautomator2,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Chromium => "chromium",
            Platform::Xcuitest => "xcuitest",
            Platform::Uiautomator2 => "uiautomator2",
        }
    }

    pub fn is_mobile(&self) -> bool {
        !matches!(self, Platform::Chromium)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AccessibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" => Ok(Platform::Chromium),
            "xcuitest" => Ok(Platform::Xcuitest),
            "uiautomator2" => Ok(Platform::Uiautomator2),
            other => Err(AccessibilityError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// 规范化与 id 映射阶段的错误；均属输入错误，不重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessibilityError {
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Unknown semantic id: {0}")]
    UnknownSemanticId(String),

    #[error("Element with raw_id={raw_id} has no {attribute} attribute")]
    ElementMissingPlatformId { raw_id: u32, attribute: &'static str },

    #[error("No element with raw_id={0} found")]
    ElementNotFound(u32),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!("Chromium".parse::<Platform>().unwrap(), Platform::Chromium);
        assert_eq!("uiautomator2".parse::<Platform>().unwrap(), Platform::Uiautomator2);
        assert!(matches!(
            "windows".parse::<Platform>(),
            Err(AccessibilityError::UnsupportedPlatform(_))
        ));
        assert!(Platform::Xcuitest.is_mobile());
    }
}
